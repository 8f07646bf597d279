//! One-shot offline training from the persisted history

use crate::anomaly::{Detector, ForestConfig, MIN_TRAINING_SAMPLES};
use crate::error::{DetectorError, Result};
use crate::storage::{HistoryStore, ModelStore, PersistedModel};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Summary of a completed offline training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub samples: usize,
    pub offset: f64,
    pub path: PathBuf,
}

/// Fit a detector on every row of `history` and persist it to `models`.
///
/// Nothing is written unless training succeeds.
pub fn train_from_history(
    history: &HistoryStore,
    models: &ModelStore,
    config: ForestConfig,
) -> Result<TrainingReport> {
    let samples = history.read_all()?;
    if samples.len() < MIN_TRAINING_SAMPLES {
        return Err(DetectorError::InsufficientData {
            required: MIN_TRAINING_SAMPLES,
            available: samples.len(),
        });
    }

    let vectors = samples
        .iter()
        .map(crate::models::extract_features)
        .collect::<Result<Vec<_>>>()?;

    let started = Instant::now();
    let detector = Detector::train(&vectors, config)?;
    let offset = detector.forest().offset().unwrap_or_default();

    models.save(&PersistedModel::new(detector))?;

    info!(
        samples = vectors.len(),
        offset = offset,
        elapsed_ms = started.elapsed().as_millis() as u64,
        path = %models.path().display(),
        "Trained model from history"
    );

    Ok(TrainingReport {
        samples: vectors.len(),
        offset,
        path: models.path().to_path_buf(),
    })
}
