//! Bounded in-memory history of recent samples
//!
//! The buffer is the training corpus for the first fit: a FIFO ring that keeps
//! the most recent `capacity` samples and evicts the oldest on overflow.

use crate::models::{extract_features, FeatureVector, MetricsSample};
use std::collections::VecDeque;

/// Default number of samples retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Ring buffer of the most recent metrics samples
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    buffer: VecDeque<MetricsSample>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest when full
    pub fn append(&mut self, sample: MetricsSample) {
        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
    }

    pub fn extend(&mut self, samples: impl IntoIterator<Item = MetricsSample>) {
        for sample in samples {
            self.append(sample);
        }
    }

    /// Oldest-to-newest view of the retained samples
    pub fn snapshot(&self) -> impl ExactSizeIterator<Item = &MetricsSample> + '_ {
        self.buffer.iter()
    }

    /// Feature vectors for every retained sample that passes validation
    pub fn feature_vectors(&self) -> Vec<FeatureVector> {
        self.buffer
            .iter()
            .filter_map(|s| extract_features(s).ok())
            .collect()
    }

    pub fn latest(&self) -> Option<&MetricsSample> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
