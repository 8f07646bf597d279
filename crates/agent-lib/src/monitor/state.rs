//! Monitor state machine
//!
//! ```text
//! Collecting --(buffer >= threshold, fit ok)--> Trained
//! Collecting | Trained --(shutdown)--> Stopped
//! ```

use crate::anomaly::Detector;
use serde::{Deserialize, Serialize};

/// Lifecycle phase without the attached detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorPhase {
    Collecting,
    Trained,
    Stopped,
}

impl std::fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorPhase::Collecting => write!(f, "collecting"),
            MonitorPhase::Trained => write!(f, "trained"),
            MonitorPhase::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum MonitorState {
    /// Accumulating history until there is enough to train
    #[default]
    Collecting,
    /// Scoring every sample with a fitted detector
    Trained(Box<Detector>),
    /// Terminal
    Stopped,
}

impl MonitorState {
    pub fn phase(&self) -> MonitorPhase {
        match self {
            MonitorState::Collecting => MonitorPhase::Collecting,
            MonitorState::Trained(_) => MonitorPhase::Trained,
            MonitorState::Stopped => MonitorPhase::Stopped,
        }
    }

    pub fn detector(&self) -> Option<&Detector> {
        match self {
            MonitorState::Trained(detector) => Some(detector),
            _ => None,
        }
    }

    /// Whether a tick in this state with `buffered` samples should fit a model
    pub fn should_train(&self, buffered: usize, threshold: usize) -> bool {
        matches!(self, MonitorState::Collecting) && buffered >= threshold
    }

    /// Install a freshly fitted detector. A stopped monitor stays stopped.
    pub fn trained(self, detector: Detector) -> Self {
        match self {
            MonitorState::Stopped => MonitorState::Stopped,
            _ => MonitorState::Trained(Box::new(detector)),
        }
    }

    pub fn stop(self) -> Self {
        MonitorState::Stopped
    }
}
