//! Fitted scaler + forest pair used by the monitor loop

use serde::{Deserialize, Serialize};

use super::{DetectionPolicy, ForestConfig, IsolationForest, Label, Scaler, MIN_TRAINING_SAMPLES};
use crate::error::{DetectorError, Result};
use crate::models::FeatureVector;

/// Outcome of scoring one feature vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub score: f64,
    pub label: Label,
    pub is_alert: bool,
}

/// Scaler and isolation forest trained together on the same corpus.
///
/// Both halves are always fitted: the only constructors are [`Detector::train`]
/// and deserialization of a previously trained detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    scaler: Scaler,
    forest: IsolationForest,
}

impl Detector {
    /// Fit the scaler on raw vectors, then the forest on the scaled corpus
    pub fn train(vectors: &[FeatureVector], config: ForestConfig) -> Result<Self> {
        config.validate()?;
        if vectors.len() < MIN_TRAINING_SAMPLES {
            return Err(DetectorError::InsufficientData {
                required: MIN_TRAINING_SAMPLES,
                available: vectors.len(),
            });
        }

        let mut scaler = Scaler::new();
        let scaled = scaler.fit_transform(vectors)?;

        let mut forest = IsolationForest::new(config);
        forest.fit(&scaled)?;

        Ok(Self { scaler, forest })
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn forest(&self) -> &IsolationForest {
        &self.forest
    }

    pub fn training_samples(&self) -> usize {
        self.forest.training_samples().unwrap_or(0)
    }

    pub fn score(&self, vector: &FeatureVector) -> Result<f64> {
        let scaled = self.scaler.transform(vector)?;
        self.forest.score(&scaled)
    }

    /// Scale, score, label and apply `policy` to a raw feature vector
    pub fn evaluate(&self, vector: &FeatureVector, policy: &DetectionPolicy) -> Result<Verdict> {
        let score = self.score(vector)?;
        let label = self.forest.label_for(score);
        Ok(Verdict {
            score,
            label,
            is_alert: policy.evaluate(score, label),
        })
    }
}
