//! Persistence of the trained detector
//!
//! The model file is a bincode envelope holding a format version, a SHA-256
//! checksum and the encoded [`PersistedModel`]. Writes go to a temp file in the
//! same directory which is synced and then renamed over the target, so readers
//! see either the old model or the new one.

use crate::anomaly::Detector;
use crate::error::{DetectorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Current on-disk format version
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Upper bound on any length read while decoding a model file
const MAX_MODEL_BYTES: usize = 64 * 1024 * 1024;

/// Detector plus the metadata written alongside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedModel {
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub detector: Detector,
}

impl PersistedModel {
    pub fn new(detector: Detector) -> Self {
        Self {
            trained_at: Utc::now(),
            sample_count: detector.training_samples(),
            detector,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelEnvelope {
    version: u32,
    checksum: String,
    payload: Vec<u8>,
}

/// Loads and saves the persisted model at a fixed path
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically replace the model file
    pub fn save(&self, model: &PersistedModel) -> Result<()> {
        let payload = bincode::serde::encode_to_vec(model, bincode::config::standard())
            .map_err(|e| DetectorError::Serialization(format!("failed to encode model: {}", e)))?;

        let envelope = ModelEnvelope {
            version: MODEL_FORMAT_VERSION,
            checksum: compute_checksum(&payload),
            payload,
        };
        let bytes = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
            .map_err(|e| {
                DetectorError::Serialization(format!("failed to encode model envelope: {}", e))
            })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;

        info!(
            path = %self.path.display(),
            size = bytes.len(),
            samples = model.sample_count,
            "Model saved"
        );
        Ok(())
    }

    /// Load the model. `Ok(None)` when no file exists.
    pub fn load(&self) -> Result<Option<PersistedModel>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted model");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let config = bincode::config::standard().with_limit::<MAX_MODEL_BYTES>();

        let (envelope, _): (ModelEnvelope, usize) =
            bincode::serde::decode_from_slice(&bytes, config)
                .map_err(|e| DetectorError::CorruptModel(format!("unreadable envelope: {}", e)))?;

        if envelope.version != MODEL_FORMAT_VERSION {
            return Err(DetectorError::CorruptModel(format!(
                "unsupported format version {} (expected {})",
                envelope.version, MODEL_FORMAT_VERSION
            )));
        }

        let checksum = compute_checksum(&envelope.payload);
        if checksum != envelope.checksum {
            return Err(DetectorError::CorruptModel(format!(
                "checksum mismatch: expected {}, got {}",
                envelope.checksum, checksum
            )));
        }

        let (model, _): (PersistedModel, usize) =
            bincode::serde::decode_from_slice(&envelope.payload, config)
                .map_err(|e| DetectorError::CorruptModel(format!("unreadable payload: {}", e)))?;

        if !model.detector.forest().is_fitted() || !model.detector.scaler().is_fitted() {
            return Err(DetectorError::CorruptModel(
                "persisted detector is not fitted".to_string(),
            ));
        }

        info!(
            path = %self.path.display(),
            trained_at = %model.trained_at,
            samples = model.sample_count,
            "Model loaded"
        );
        Ok(Some(model))
    }
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
