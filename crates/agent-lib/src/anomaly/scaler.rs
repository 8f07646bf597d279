//! Per-feature standardization
//!
//! Learns a mean and scale for each feature over the training corpus and maps
//! every later vector to `(x - mean) / scale`.

use crate::error::{DetectorError, Result};
use crate::models::{FeatureVector, NUM_FEATURES};
use serde::{Deserialize, Serialize};

/// Standard deviations at or below this are treated as a constant feature
const MIN_SCALE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct ScalerState {
    mean: [f64; NUM_FEATURES],
    scale: [f64; NUM_FEATURES],
}

/// Standard scaler with population statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    state: Option<ScalerState>,
}

impl Scaler {
    pub fn new() -> Self {
        Self { state: None }
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Learn mean and scale from `vectors`, replacing any previous fit
    pub fn fit(&mut self, vectors: &[FeatureVector]) -> Result<()> {
        if vectors.is_empty() {
            return Err(DetectorError::InsufficientData {
                required: 1,
                available: 0,
            });
        }

        let n = vectors.len() as f64;
        let mut mean = [0.0; NUM_FEATURES];
        for v in vectors {
            for (acc, x) in mean.iter_mut().zip(v.0) {
                *acc += x;
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }

        // Two-pass variance for numerical stability
        let mut var = [0.0; NUM_FEATURES];
        for v in vectors {
            for i in 0..NUM_FEATURES {
                var[i] += (v.0[i] - mean[i]).powi(2);
            }
        }

        let mut scale = [1.0; NUM_FEATURES];
        for i in 0..NUM_FEATURES {
            let std_dev = (var[i] / n).sqrt();
            if std_dev > MIN_SCALE {
                scale[i] = std_dev;
            }
        }

        self.state = Some(ScalerState { mean, scale });
        Ok(())
    }

    pub fn transform(&self, vector: &FeatureVector) -> Result<FeatureVector> {
        let state = self.state.as_ref().ok_or(DetectorError::NotFitted("scaler"))?;
        let mut out = [0.0; NUM_FEATURES];
        for i in 0..NUM_FEATURES {
            out[i] = (vector.0[i] - state.mean[i]) / state.scale[i];
        }
        Ok(FeatureVector(out))
    }

    pub fn fit_transform(&mut self, vectors: &[FeatureVector]) -> Result<Vec<FeatureVector>> {
        self.fit(vectors)?;
        vectors.iter().map(|v| self.transform(v)).collect()
    }

    pub fn mean(&self) -> Option<&[f64; NUM_FEATURES]> {
        self.state.as_ref().map(|s| &s.mean)
    }

    pub fn scale(&self) -> Option<&[f64; NUM_FEATURES]> {
        self.state.as_ref().map(|s| &s.scale)
    }
}
