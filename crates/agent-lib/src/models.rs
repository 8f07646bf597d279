//! Core data models for the host monitor

use crate::error::{DetectorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of features in every vector handed to the detector
pub const NUM_FEATURES: usize = 9;

/// Feature names in model order. Column order of the history store and the
/// index order of [`FeatureVector`] both follow this list.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "cpu_percent",
    "memory_percent",
    "disk_percent",
    "process_count",
    "load_avg",
    "net_sent_mb",
    "net_recv_mb",
    "io_read_mb",
    "io_write_mb",
];

/// Host metrics collected in one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub process_count: f64,
    pub load_avg: f64,
    pub net_sent_mb: f64,
    pub net_recv_mb: f64,
    pub io_read_mb: f64,
    pub io_write_mb: f64,
}

impl MetricsSample {
    /// Field values in model order
    pub fn values(&self) -> [f64; NUM_FEATURES] {
        [
            self.cpu_percent,
            self.memory_percent,
            self.disk_percent,
            self.process_count,
            self.load_avg,
            self.net_sent_mb,
            self.net_recv_mb,
            self.io_read_mb,
            self.io_write_mb,
        ]
    }

    /// Rebuild a sample from values in model order
    pub fn from_values(timestamp: DateTime<Utc>, values: [f64; NUM_FEATURES]) -> Self {
        Self {
            timestamp,
            cpu_percent: values[0],
            memory_percent: values[1],
            disk_percent: values[2],
            process_count: values[3],
            load_avg: values[4],
            net_sent_mb: values[5],
            net_recv_mb: values[6],
            io_read_mb: values[7],
            io_write_mb: values[8],
        }
    }

    /// Check that every field is finite and non-negative
    pub fn validate(&self) -> Result<()> {
        for (name, value) in FEATURE_NAMES.iter().zip(self.values()) {
            if !value.is_finite() {
                return Err(DetectorError::Schema(format!(
                    "field {} is not a finite number ({})",
                    name, value
                )));
            }
            if value < 0.0 {
                return Err(DetectorError::Schema(format!(
                    "field {} is negative ({})",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Fixed-length numeric vector handed to the scaler and the forest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; NUM_FEATURES]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        NUM_FEATURES
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl TryFrom<&MetricsSample> for FeatureVector {
    type Error = DetectorError;

    fn try_from(sample: &MetricsSample) -> Result<Self> {
        sample.validate()?;
        Ok(FeatureVector(sample.values()))
    }
}

/// Extract a feature vector, validating the sample schema
pub fn extract_features(sample: &MetricsSample) -> Result<FeatureVector> {
    FeatureVector::try_from(sample)
}
