//! Unsupervised anomaly detection for host metrics
//!
//! This module provides:
//! - Per-feature standardization ([`Scaler`])
//! - An isolation forest outlier model ([`IsolationForest`])
//! - The alert decision policy ([`DetectionPolicy`])
//! - Alert fan-out to log, webhook and email dispatchers

mod alerter;
mod detector;
mod isolation_forest;
mod policy;
mod scaler;

pub use alerter::{
    alert_subject, format_alert_message, AlertDispatcher, Alerter, AlertmanagerAlert,
    AlertmanagerPayload, DispatchReport, EmailDispatcher, LogDispatcher, SmtpSettings,
    WebhookDispatcher, DEFAULT_DISPATCH_TIMEOUT, DEFAULT_SMTP_PORT,
};
pub use detector::{Detector, Verdict};
pub use isolation_forest::{
    average_path_length, ForestConfig, IsolationForest, Label, MIN_SUBSAMPLE,
    MIN_TRAINING_SAMPLES,
};
pub use policy::{DetectionPolicy, DEFAULT_ALERT_THRESHOLD};
pub use scaler::Scaler;
