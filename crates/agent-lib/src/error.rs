//! Error taxonomy for the detection pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("malformed metrics sample: {0}")]
    Schema(String),

    #[error("{0} used before it was fitted")]
    NotFitted(&'static str),

    #[error("insufficient training data: need at least {required} samples, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("persisted model is unreadable: {0}")]
    CorruptModel(String),

    #[error("metric collection failed: {0}")]
    Collection(String),

    #[error("alert dispatch failed: {0}")]
    Dispatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectorError {
    /// Errors that abort a single tick but leave the loop running
    pub fn is_tick_local(&self) -> bool {
        matches!(
            self,
            DetectorError::Schema(_)
                | DetectorError::NotFitted(_)
                | DetectorError::Collection(_)
                | DetectorError::Dispatch(_)
        )
    }
}

impl From<csv::Error> for DetectorError {
    fn from(e: csv::Error) -> Self {
        DetectorError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for DetectorError {
    fn from(e: serde_json::Error) -> Self {
        DetectorError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = DetectorError::InsufficientData {
            required: 16,
            available: 0,
        };
        assert_eq!(
            err.to_string(),
            "insufficient training data: need at least 16 samples, got 0"
        );
    }

    #[test]
    fn test_tick_local_classification() {
        assert!(DetectorError::Collection("x".into()).is_tick_local());
        assert!(DetectorError::NotFitted("scaler").is_tick_local());
        assert!(!DetectorError::CorruptModel("x".into()).is_tick_local());
    }
}
