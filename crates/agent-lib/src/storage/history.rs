//! CSV store of every collected sample
//!
//! One row per tick with a `timestamp` column followed by the feature columns
//! in model order. The explicit train command reads the whole file; startup
//! reads the tail to refill the in-memory buffer.

use crate::error::{DetectorError, Result};
use crate::models::{MetricsSample, FEATURE_NAMES, NUM_FEATURES};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Append-only CSV history of metrics samples
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is new or empty
    pub fn append(&self, sample: &MetricsSample) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            let mut header = Vec::with_capacity(NUM_FEATURES + 1);
            header.push("timestamp");
            header.extend(FEATURE_NAMES);
            writer.write_record(&header)?;
        }

        let mut record = Vec::with_capacity(NUM_FEATURES + 1);
        record.push(sample.timestamp.to_rfc3339());
        record.extend(sample.values().iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
        writer.flush()?;
        Ok(())
    }

    /// Read every row. A missing file is an empty history.
    pub fn read_all(&self) -> Result<Vec<MetricsSample>> {
        let mut samples = Vec::new();
        self.for_each_row(|s| samples.push(s))?;
        Ok(samples)
    }

    /// Read the last `n` rows in file order
    pub fn read_tail(&self, n: usize) -> Result<Vec<MetricsSample>> {
        let mut tail = VecDeque::with_capacity(n.min(10_000));
        if n == 0 {
            return Ok(Vec::new());
        }
        self.for_each_row(|s| {
            if tail.len() == n {
                tail.pop_front();
            }
            tail.push_back(s);
        })?;
        Ok(tail.into())
    }

    fn for_each_row(&self, mut f: impl FnMut(MetricsSample)) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Ok(());
        }

        let column = |name: &str| -> Result<usize> {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                DetectorError::Schema(format!("history file is missing column '{}'", name))
            })
        };
        let ts_index = column("timestamp")?;
        let mut feature_index = [0usize; NUM_FEATURES];
        for (slot, name) in feature_index.iter_mut().zip(FEATURE_NAMES) {
            *slot = column(name)?;
        }

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            // Header is line 1
            let line = row + 2;

            let raw_ts = field(&record, ts_index, "timestamp", line)?;
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
                DetectorError::Schema(format!("line {}: unparsable timestamp '{}'", line, raw_ts))
            })?;

            let mut values = [0.0; NUM_FEATURES];
            for ((value, index), name) in values.iter_mut().zip(feature_index).zip(FEATURE_NAMES) {
                let raw = field(&record, index, name, line)?;
                *value = raw.parse::<f64>().map_err(|_| {
                    DetectorError::Schema(format!(
                        "line {}: {} is not numeric ('{}')",
                        line, name, raw
                    ))
                })?;
            }

            let sample = MetricsSample::from_values(timestamp, values);
            sample
                .validate()
                .map_err(|e| DetectorError::Schema(format!("line {}: {}", line, e)))?;
            f(sample);
        }

        Ok(())
    }
}

fn field<'r>(record: &'r csv::StringRecord, index: usize, name: &str, line: usize) -> Result<&'r str> {
    record.get(index).filter(|v| !v.is_empty()).ok_or_else(|| {
        DetectorError::Schema(format!("line {}: missing value for {}", line, name))
    })
}

/// RFC 3339, or a naive ISO-8601 local timestamp taken as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
