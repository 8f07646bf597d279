//! Isolation forest outlier scoring
//!
//! Anomalies are separated from the bulk of the data in fewer random
//! axis-aligned splits, so their average path length across an ensemble of
//! randomized trees is shorter.
//!
//! Scores follow the usual convention of `-2^(-E[h(x)] / c(psi))`: values lie in
//! (-1, 0), around -0.5 for typical points and towards -1 for outliers. The
//! predicted label compares the score against an offset calibrated on the
//! training set so that roughly `contamination` of it is labeled anomalous.
//!
//! Each split remembers the range its node's subsample spanned on the split
//! feature. A point outside that range is isolated at the split, since any
//! threshold between it and the subsample would separate it.

use crate::error::{DetectorError, Result};
use crate::models::{FeatureVector, NUM_FEATURES};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Smallest subsample a tree may be grown on
pub const MIN_SUBSAMPLE: usize = 8;

/// Minimum training set size: two full minimum subsamples
pub const MIN_TRAINING_SAMPLES: usize = 2 * MIN_SUBSAMPLE;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Hyperparameters for the forest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees in the ensemble
    pub n_estimators: usize,
    /// Expected fraction of anomalies in the training data, in (0, 0.5]
    pub contamination: f64,
    /// Upper bound on the per-tree subsample size
    pub max_samples: usize,
    /// Seed for subsampling and split selection
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            contamination: 0.1,
            max_samples: 256,
            seed: 42,
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(DetectorError::InvalidConfig(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(DetectorError::InvalidConfig(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.max_samples < MIN_SUBSAMPLE {
            return Err(DetectorError::InvalidConfig(format!(
                "max_samples must be at least {}, got {}",
                MIN_SUBSAMPLE, self.max_samples
            )));
        }
        Ok(())
    }

    /// Per-tree subsample size for a training set of `n` points
    pub fn subsample_size(&self, n: usize) -> usize {
        self.max_samples.min(n / 2).max(MIN_SUBSAMPLE)
    }
}

/// Label assigned by the forest's calibrated threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Normal,
    Anomaly,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Normal => write!(f, "normal"),
            Label::Anomaly => write!(f, "anomaly"),
        }
    }
}

/// Tree node stored in a flat arena, root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        /// Range of `feature` over the node's subsample
        lo: f64,
        hi: f64,
        left: u32,
        right: u32,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow<R: Rng>(
        data: &[FeatureVector],
        indices: &mut [usize],
        max_depth: usize,
        rng: &mut R,
    ) -> Self {
        let mut nodes = Vec::with_capacity(2 * indices.len());
        Self::grow_node(data, indices, 0, max_depth, rng, &mut nodes);
        Self { nodes }
    }

    fn grow_node<R: Rng>(
        data: &[FeatureVector],
        indices: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut R,
        nodes: &mut Vec<Node>,
    ) -> u32 {
        let id = nodes.len() as u32;

        if depth >= max_depth || indices.len() <= 1 {
            nodes.push(Node::Leaf {
                size: indices.len(),
            });
            return id;
        }

        // Only features that still vary in this node can split it
        let mut candidates = [(0usize, 0.0f64, 0.0f64); NUM_FEATURES];
        let mut n_candidates = 0;
        for feature in 0..NUM_FEATURES {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &i in indices.iter() {
                let v = data[i].0[feature];
                min = min.min(v);
                max = max.max(v);
            }
            if max > min {
                candidates[n_candidates] = (feature, min, max);
                n_candidates += 1;
            }
        }

        if n_candidates == 0 {
            nodes.push(Node::Leaf {
                size: indices.len(),
            });
            return id;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..n_candidates)];
        let threshold = rng.gen_range(min..max);

        // min always lands left and max always right, so both sides are non-empty
        let mut mid = 0;
        for j in 0..indices.len() {
            if data[indices[j]].0[feature] <= threshold {
                indices.swap(mid, j);
                mid += 1;
            }
        }

        nodes.push(Node::Leaf { size: 0 });
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = Self::grow_node(data, left_idx, depth + 1, max_depth, rng, nodes);
        let right = Self::grow_node(data, right_idx, depth + 1, max_depth, rng, nodes);
        nodes[id as usize] = Node::Split {
            feature,
            threshold,
            lo: min,
            hi: max,
            left,
            right,
        };
        id
    }

    fn path_length(&self, x: &FeatureVector) -> f64 {
        let mut idx = 0usize;
        let mut depth = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    lo,
                    hi,
                    left,
                    right,
                } => {
                    let value = x.0[*feature];
                    if value < *lo || value > *hi {
                        return depth as f64 + 1.0;
                    }
                    idx = if value <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                    depth += 1;
                }
                Node::Leaf { size } => {
                    return depth as f64 + average_path_length(*size);
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search among `n` points, c(n)
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedForest {
    trees: Vec<IsolationTree>,
    subsample_size: usize,
    offset: f64,
    training_samples: usize,
}

/// Ensemble of isolation trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    config: ForestConfig,
    fitted: Option<FittedForest>,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(ForestConfig::default())
    }
}

impl IsolationForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Calibrated score threshold below which points are labeled anomalous
    pub fn offset(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.offset)
    }

    pub fn training_samples(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.training_samples)
    }

    /// Grow the ensemble on (already scaled) training vectors
    pub fn fit(&mut self, data: &[FeatureVector]) -> Result<()> {
        self.config.validate()?;

        if data.len() < MIN_TRAINING_SAMPLES {
            return Err(DetectorError::InsufficientData {
                required: MIN_TRAINING_SAMPLES,
                available: data.len(),
            });
        }

        let subsample_size = self.config.subsample_size(data.len());
        let max_depth = (subsample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let trees: Vec<IsolationTree> = (0..self.config.n_estimators)
            .map(|_| {
                let mut indices =
                    rand::seq::index::sample(&mut rng, data.len(), subsample_size).into_vec();
                IsolationTree::grow(data, &mut indices, max_depth, &mut rng)
            })
            .collect();

        let mut fitted = FittedForest {
            trees,
            subsample_size,
            offset: 0.0,
            training_samples: data.len(),
        };

        let mut scores: Vec<f64> = data.iter().map(|x| raw_score(&fitted, x)).collect();
        fitted.offset = percentile(&mut scores, self.config.contamination * 100.0);

        self.fitted = Some(fitted);
        Ok(())
    }

    /// Continuous anomaly score; lower means more anomalous
    pub fn score(&self, x: &FeatureVector) -> Result<f64> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(DetectorError::NotFitted("isolation forest"))?;
        Ok(raw_score(fitted, x))
    }

    /// Score minus the calibrated offset; negative means anomalous
    pub fn decision_function(&self, x: &FeatureVector) -> Result<f64> {
        let score = self.score(x)?;
        let offset = self.offset().ok_or(DetectorError::NotFitted("isolation forest"))?;
        Ok(score - offset)
    }

    pub fn predict(&self, x: &FeatureVector) -> Result<Label> {
        let score = self.score(x)?;
        Ok(self.label_for(score))
    }

    /// Label a score already computed by [`IsolationForest::score`]
    pub fn label_for(&self, score: f64) -> Label {
        match self.fitted.as_ref() {
            Some(f) if score < f.offset => Label::Anomaly,
            _ => Label::Normal,
        }
    }
}

fn raw_score(fitted: &FittedForest, x: &FeatureVector) -> f64 {
    let mean_path = fitted
        .trees
        .iter()
        .map(|tree| tree.path_length(x))
        .sum::<f64>()
        / fitted.trees.len() as f64;
    let c = average_path_length(fitted.subsample_size);
    -(2f64.powf(-mean_path / c))
}

/// Linear-interpolated percentile, `p` in [0, 100]
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}
