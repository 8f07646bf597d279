//! Observability infrastructure for the host monitor
//!
//! Provides:
//! - Prometheus metrics (tick latency, scoring latency, history size, model state)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct MonitorMetricsInner {
    tick_latency_seconds: Histogram,
    scoring_latency_seconds: Histogram,
    history_size: IntGauge,
    model_trained: IntGauge,
    last_score: Gauge,
    alerts_total: IntCounter,
    collection_errors_total: IntCounter,
    dispatch_failures_total: IntCounter,
    trainings_total: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "hostwatch_tick_latency_seconds",
                "Time spent on one collect/score/alert tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            scoring_latency_seconds: register_histogram!(
                "hostwatch_scoring_latency_seconds",
                "Time spent scaling and scoring one sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scoring_latency_seconds"),

            history_size: register_int_gauge!(
                "hostwatch_history_samples",
                "Number of samples in the in-memory history buffer"
            )
            .expect("Failed to register history_samples"),

            model_trained: register_int_gauge!(
                "hostwatch_model_trained",
                "1 when a trained model is loaded, 0 while collecting"
            )
            .expect("Failed to register model_trained"),

            last_score: register_gauge!(
                "hostwatch_last_anomaly_score",
                "Anomaly score of the most recent sample (lower is more anomalous)"
            )
            .expect("Failed to register last_anomaly_score"),

            alerts_total: register_int_counter!(
                "hostwatch_alerts_total",
                "Total number of samples that raised an alert"
            )
            .expect("Failed to register alerts_total"),

            collection_errors_total: register_int_counter!(
                "hostwatch_collection_errors_total",
                "Total number of failed metric collections"
            )
            .expect("Failed to register collection_errors_total"),

            dispatch_failures_total: register_int_counter!(
                "hostwatch_dispatch_failures_total",
                "Total number of failed alert deliveries"
            )
            .expect("Failed to register dispatch_failures_total"),

            trainings_total: register_int_counter!(
                "hostwatch_trainings_total",
                "Total number of completed model trainings"
            )
            .expect("Failed to register trainings_total"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn observe_scoring_latency(&self, duration_secs: f64) {
        self.inner().scoring_latency_seconds.observe(duration_secs);
    }

    pub fn set_history_size(&self, samples: usize) {
        self.inner().history_size.set(samples as i64);
    }

    pub fn set_model_trained(&self, trained: bool) {
        self.inner().model_trained.set(i64::from(trained));
    }

    pub fn set_last_score(&self, score: f64) {
        self.inner().last_score.set(score);
    }

    pub fn inc_alerts(&self) {
        self.inner().alerts_total.inc();
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors_total.inc();
    }

    pub fn inc_dispatch_failures(&self) {
        self.inner().dispatch_failures_total.inc();
    }

    pub fn inc_trainings(&self) {
        self.inner().trainings_total.inc();
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for training progress,
/// anomalies, and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log cold-start accumulation progress
    pub fn log_progress(&self, collected: usize, threshold: usize) {
        info!(
            event = "collecting",
            node = %self.node_name,
            collected = collected,
            threshold = threshold,
            "Collecting training data: {}/{} samples",
            collected,
            threshold
        );
    }

    /// Log a completed training run
    pub fn log_training_complete(&self, samples: usize, offset: f64, elapsed_ms: u128) {
        info!(
            event = "model_trained",
            node = %self.node_name,
            samples = samples,
            offset = offset,
            elapsed_ms = elapsed_ms as u64,
            "Model trained successfully on {} samples",
            samples
        );
    }

    /// Log a normal-operation score line
    pub fn log_normal(&self, score: f64) {
        info!(
            event = "sample_normal",
            node = %self.node_name,
            score = score,
            "Normal operation (score: {:.4})",
            score
        );
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, score: f64, label: &str, cpu_percent: f64, load_avg: f64) {
        warn!(
            event = "anomaly_detected",
            node = %self.node_name,
            score = score,
            label = %label,
            cpu_percent = cpu_percent,
            load_avg = load_avg,
            "ANOMALY DETECTED (score: {:.4})",
            score
        );
    }

    /// Log a failed alert delivery
    pub fn log_dispatch_failure(&self, dispatcher: &str, error: &str) {
        warn!(
            event = "dispatch_failed",
            node = %self.node_name,
            dispatcher = %dispatcher,
            error = %error,
            "Alert delivery failed"
        );
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str, trained: bool) {
        info!(
            event = "monitor_started",
            node = %self.node_name,
            version = %version,
            model_loaded = trained,
            "Host monitor started"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Host monitor shutting down"
        );
    }

    /// Log a persisted model that could not be used
    pub fn log_model_discarded(&self, reason: &str) {
        warn!(
            event = "model_discarded",
            node = %self.node_name,
            reason = %reason,
            "Persisted model is unusable, starting cold"
        );
    }
}
