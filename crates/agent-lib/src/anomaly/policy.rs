//! Alert decision policy

use serde::{Deserialize, Serialize};

use super::Label;

/// Default alert threshold, independent of the model's calibrated offset
pub const DEFAULT_ALERT_THRESHOLD: f64 = -0.5;

/// Turns a score and label into an alert decision.
///
/// A sample alerts when the forest labels it anomalous or when its score falls
/// below `alert_threshold`. Either signal alone is enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionPolicy {
    pub alert_threshold: f64,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
        }
    }
}

impl DetectionPolicy {
    pub fn new(alert_threshold: f64) -> Self {
        Self { alert_threshold }
    }

    pub fn evaluate(&self, score: f64, label: Label) -> bool {
        label == Label::Anomaly || score < self.alert_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold() {
        assert_eq!(DetectionPolicy::default().alert_threshold, -0.5);
    }

    #[test]
    fn test_score_below_threshold_alerts_regardless_of_label() {
        let policy = DetectionPolicy::default();
        assert!(policy.evaluate(-0.6, Label::Normal));
        assert!(policy.evaluate(-0.6, Label::Anomaly));
    }

    #[test]
    fn test_anomaly_label_alerts_above_threshold() {
        let policy = DetectionPolicy::default();
        assert!(policy.evaluate(-0.45, Label::Anomaly));
    }

    #[test]
    fn test_normal_above_threshold_is_quiet() {
        let policy = DetectionPolicy::default();
        assert!(!policy.evaluate(-0.45, Label::Normal));
        // Threshold is strict
        assert!(!policy.evaluate(-0.5, Label::Normal));
    }

    #[test]
    fn test_custom_threshold() {
        let policy = DetectionPolicy::new(-0.7);
        assert!(!policy.evaluate(-0.6, Label::Normal));
        assert!(policy.evaluate(-0.71, Label::Normal));
    }
}
