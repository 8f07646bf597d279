//! Append-only JSON-lines audit log of collected samples and alerts

use crate::error::Result;
use crate::models::MetricsSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    /// Every collected sample, scored once a model exists
    Sample,
    /// A sample that raised an alert
    Alert,
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricsSample,
    /// Absent while the monitor is still collecting training data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub is_alert: bool,
}

impl AuditRecord {
    pub fn sample(metrics: &MetricsSample, score: f64, is_alert: bool) -> Self {
        Self {
            kind: AuditKind::Sample,
            timestamp: Utc::now(),
            metrics: metrics.clone(),
            score: Some(score),
            is_alert,
        }
    }

    /// A sample collected before any model was trained
    pub fn unscored(metrics: &MetricsSample) -> Self {
        Self {
            kind: AuditKind::Sample,
            timestamp: Utc::now(),
            metrics: metrics.clone(),
            score: None,
            is_alert: false,
        }
    }

    pub fn alert(metrics: &MetricsSample, score: f64) -> Self {
        Self {
            kind: AuditKind::Alert,
            timestamp: Utc::now(),
            metrics: metrics.clone(),
            score: Some(score),
            is_alert: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per record
        file.write_all(&line)?;
        Ok(())
    }

    /// Read every record back; used by tests and offline inspection
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}
