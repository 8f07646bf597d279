//! Periodic monitor loop
//!
//! Each tick collects one sample, records it, trains once enough history has
//! accumulated, and from then on scores every sample and raises alerts. Ticks
//! run to completion; shutdown is only observed in the sleep between them.

use super::state::{MonitorPhase, MonitorState};
use crate::anomaly::{
    Alerter, DetectionPolicy, Detector, DispatchReport, ForestConfig, LogDispatcher, Verdict,
    MIN_TRAINING_SAMPLES,
};
use crate::collector::MetricsCollector;
use crate::error::{DetectorError, Result};
use crate::health::{components, HealthRegistry, MonitorStatus};
use crate::models::{extract_features, FeatureVector, MetricsSample};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::storage::{
    AuditLog, AuditRecord, HistoryBuffer, HistoryStore, ModelStore, PersistedModel,
    DEFAULT_HISTORY_CAPACITY,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default number of samples before the first fit
pub const DEFAULT_TRAINING_THRESHOLD: usize = 100;

/// Consecutive failed collections before the collector is reported unhealthy
pub const COLLECTOR_UNHEALTHY_AFTER: u32 = 3;

/// Configuration for the monitor loop
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sleep between the end of one tick and the start of the next (default: 60 seconds)
    pub interval: Duration,
    /// Samples required before the first fit (default: 100)
    pub training_threshold: usize,
    /// In-memory history capacity (default: 1000)
    pub history_capacity: usize,
    /// Refill the buffer from the history store at startup
    pub restore_history: bool,
    pub forest: ForestConfig,
    pub policy: DetectionPolicy,
    /// Host name attached to logs and alerts
    pub node_name: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            training_threshold: DEFAULT_TRAINING_THRESHOLD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            restore_history: true,
            forest: ForestConfig::default(),
            policy: DetectionPolicy::default(),
            node_name: "localhost".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        self.forest.validate()?;
        if self.training_threshold < MIN_TRAINING_SAMPLES {
            return Err(DetectorError::InvalidConfig(format!(
                "training_threshold must be at least {}, got {}",
                MIN_TRAINING_SAMPLES, self.training_threshold
            )));
        }
        if self.training_threshold > self.history_capacity {
            return Err(DetectorError::InvalidConfig(format!(
                "training_threshold ({}) exceeds history_capacity ({})",
                self.training_threshold, self.history_capacity
            )));
        }
        if !self.policy.alert_threshold.is_finite() {
            return Err(DetectorError::InvalidConfig(
                "alert_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Sample recorded; not enough history to train yet
    Collecting { collected: usize, threshold: usize },
    /// Sample scored. `trained` is set when the model was fitted in this tick.
    Scored {
        verdict: Verdict,
        trained: bool,
        dispatch: Option<DispatchReport>,
    },
    /// The loop has stopped; nothing was collected
    Stopped,
}

/// The monitor loop: owns the history buffer and the detector state
pub struct MonitorLoop {
    collector: Arc<dyn MetricsCollector>,
    alerter: Arc<Alerter>,
    model_store: ModelStore,
    history_store: Option<HistoryStore>,
    audit_log: Option<AuditLog>,
    health: Option<HealthRegistry>,
    config: MonitorConfig,
    buffer: HistoryBuffer,
    state: MonitorState,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    failed_collections: u32,
    last_score: Option<f64>,
    last_tick: Option<DateTime<Utc>>,
    alerts: u64,
}

impl MonitorLoop {
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn phase(&self) -> MonitorPhase {
        self.state.phase()
    }

    pub fn buffer(&self) -> &HistoryBuffer {
        &self.buffer
    }

    /// Run ticks until a shutdown signal arrives, then move to `Stopped`
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            phase = %self.phase(),
            buffered = self.buffer.len(),
            "Starting monitor loop"
        );
        self.register_health().await;

        loop {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => break,
            }

            if let Err(e) = self.tick().await {
                if e.is_tick_local() {
                    warn!(error = %e, "Tick skipped");
                } else {
                    error!(error = %e, "Tick failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        self.stop();
        if let Some(health) = &self.health {
            health.set_running(false).await;
        }
        self.publish_status().await;
        self.logger.log_shutdown("shutdown signal received");
    }

    /// Move to the terminal state
    pub fn stop(&mut self) {
        self.state = std::mem::take(&mut self.state).stop();
        self.metrics.set_model_trained(false);
    }

    /// Run one collect / record / train / score / alert cycle
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if self.phase() == MonitorPhase::Stopped {
            return Ok(TickOutcome::Stopped);
        }
        let outcome = self.run_tick().await;
        self.last_tick = Some(Utc::now());
        self.publish_status().await;
        outcome
    }

    async fn run_tick(&mut self) -> Result<TickOutcome> {
        let started = Instant::now();

        let sample = match self.collector.collect().await {
            Ok(sample) => sample,
            Err(e) => {
                self.collection_failed(&e).await;
                return Err(e);
            }
        };
        let features = extract_features(&sample)?;
        self.failed_collections = 0;
        self.set_health(components::COLLECTOR, None).await;

        self.record(&sample);

        let mut trained = false;
        if self.state.should_train(self.buffer.len(), self.config.training_threshold) {
            trained = self.train_from_buffer().await;
        }

        if self.phase() == MonitorPhase::Collecting {
            self.audit(AuditRecord::unscored(&sample));
            self.logger
                .log_progress(self.buffer.len(), self.config.training_threshold);
            self.metrics
                .observe_tick_latency(started.elapsed().as_secs_f64());
            return Ok(TickOutcome::Collecting {
                collected: self.buffer.len(),
                threshold: self.config.training_threshold,
            });
        }

        let verdict = self.score(&features)?;
        self.last_score = Some(verdict.score);
        if verdict.is_alert {
            self.alerts += 1;
        }
        let dispatch = self.handle_verdict(&sample, &verdict).await;

        self.metrics
            .observe_tick_latency(started.elapsed().as_secs_f64());
        Ok(TickOutcome::Scored {
            verdict,
            trained,
            dispatch,
        })
    }

    /// Append to the buffer and the history store
    fn record(&mut self, sample: &MetricsSample) {
        self.buffer.append(sample.clone());
        self.metrics.set_history_size(self.buffer.len());

        if let Some(store) = &self.history_store {
            if let Err(e) = store.append(sample) {
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Failed to append to history store"
                );
            }
        }
    }

    /// Fit on the whole buffer and persist. Returns true when the state moved to `Trained`.
    async fn train_from_buffer(&mut self) -> bool {
        let vectors = self.buffer.feature_vectors();
        let started = Instant::now();

        let detector = match Detector::train(&vectors, self.config.forest) {
            Ok(detector) => detector,
            Err(e) => {
                warn!(error = %e, samples = vectors.len(), "Training failed, still collecting");
                self.set_health(components::DETECTOR, Some(e.to_string())).await;
                return false;
            }
        };

        let offset = detector.forest().offset().unwrap_or_default();
        self.logger
            .log_training_complete(vectors.len(), offset, started.elapsed().as_millis());
        self.metrics.inc_trainings();
        self.metrics.set_model_trained(true);
        self.set_health(components::DETECTOR, None).await;

        let persisted = PersistedModel::new(detector);
        match self.model_store.save(&persisted) {
            Ok(()) => self.set_health(components::MODEL_STORE, None).await,
            Err(e) => {
                // The in-memory model stays in use; the next start retrains
                error!(
                    path = %self.model_store.path().display(),
                    error = %e,
                    "Failed to persist trained model"
                );
                self.set_health(components::MODEL_STORE, Some(e.to_string()))
                    .await;
            }
        }

        self.state = std::mem::take(&mut self.state).trained(persisted.detector);
        true
    }

    fn score(&self, features: &FeatureVector) -> Result<Verdict> {
        let detector = self
            .state
            .detector()
            .ok_or(DetectorError::NotFitted("detector"))?;

        let started = Instant::now();
        let verdict = detector.evaluate(features, &self.config.policy)?;
        self.metrics
            .observe_scoring_latency(started.elapsed().as_secs_f64());
        self.metrics.set_last_score(verdict.score);
        Ok(verdict)
    }

    async fn handle_verdict(
        &self,
        sample: &MetricsSample,
        verdict: &Verdict,
    ) -> Option<DispatchReport> {
        self.audit(AuditRecord::sample(sample, verdict.score, verdict.is_alert));

        if !verdict.is_alert {
            self.logger.log_normal(verdict.score);
            return None;
        }

        self.metrics.inc_alerts();
        self.logger.log_anomaly(
            verdict.score,
            &verdict.label.to_string(),
            sample.cpu_percent,
            sample.load_avg,
        );

        let report = self.alerter.dispatch(sample, verdict.score).await;
        for (dispatcher, reason) in &report.failed {
            self.metrics.inc_dispatch_failures();
            self.logger.log_dispatch_failure(dispatcher, reason);
        }
        if report.suppressed {
            debug!("Alert suppressed within dedup window");
        } else {
            let degraded = report
                .failed
                .first()
                .map(|(name, reason)| format!("{}: {}", name, reason));
            self.set_health(components::ALERTER, degraded).await;
        }

        self.audit(AuditRecord::alert(sample, verdict.score));
        Some(report)
    }

    fn audit(&self, record: AuditRecord) {
        if let Some(log) = &self.audit_log {
            if let Err(e) = log.append(&record) {
                warn!(path = %log.path().display(), error = %e, "Failed to write audit record");
            }
        }
    }

    async fn collection_failed(&mut self, error: &DetectorError) {
        self.metrics.inc_collection_errors();
        self.failed_collections = self.failed_collections.saturating_add(1);

        if let Some(health) = &self.health {
            let reason = format!(
                "{} ({} consecutive failures)",
                error, self.failed_collections
            );
            if self.failed_collections >= COLLECTOR_UNHEALTHY_AFTER {
                health.set_unhealthy(components::COLLECTOR, reason).await;
            } else {
                health.set_degraded(components::COLLECTOR, reason).await;
            }
        }
    }

    /// `None` marks the component healthy, `Some(reason)` degraded
    async fn set_health(&self, component: &str, problem: Option<String>) {
        if let Some(health) = &self.health {
            match problem {
                None => health.set_healthy(component).await,
                Some(reason) => health.set_degraded(component, reason).await,
            }
        }
    }

    async fn register_health(&self) {
        if let Some(health) = &self.health {
            for name in components::ALL {
                health.register(name).await;
            }
            if self.phase() == MonitorPhase::Collecting {
                health
                    .set_degraded(components::DETECTOR, "collecting training data")
                    .await;
            }
            health.set_running(true).await;
        }
        self.publish_status().await;
    }

    async fn publish_status(&self) {
        if let Some(health) = &self.health {
            health
                .publish(MonitorStatus {
                    phase: self.phase(),
                    buffered: self.buffer.len(),
                    training_threshold: self.config.training_threshold,
                    last_score: self.last_score,
                    last_tick: self.last_tick,
                    alerts: self.alerts,
                })
                .await;
        }
    }
}

/// Builder for creating the monitor loop
pub struct MonitorLoopBuilder {
    collector: Option<Arc<dyn MetricsCollector>>,
    alerter: Option<Arc<Alerter>>,
    model_store: Option<ModelStore>,
    history_store: Option<HistoryStore>,
    audit_log: Option<AuditLog>,
    health: Option<HealthRegistry>,
    config: MonitorConfig,
}

impl MonitorLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            collector: None,
            alerter: None,
            model_store: None,
            history_store: None,
            audit_log: None,
            health: None,
            config: MonitorConfig::default(),
        }
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the metric source
    pub fn collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Set the alerter (defaults to log-only delivery)
    pub fn alerter(mut self, alerter: Arc<Alerter>) -> Self {
        self.alerter = Some(alerter);
        self
    }

    pub fn model_store(mut self, store: ModelStore) -> Self {
        self.model_store = Some(store);
        self
    }

    pub fn history_store(mut self, store: HistoryStore) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn audit_log(mut self, log: AuditLog) -> Self {
        self.audit_log = Some(log);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Set the sleep between ticks
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn training_threshold(mut self, threshold: usize) -> Self {
        self.config.training_threshold = threshold;
        self
    }

    /// Build the loop, loading any persisted model and restoring recent history
    pub fn build(self) -> Result<MonitorLoop> {
        self.config.validate()?;

        let collector = self
            .collector
            .ok_or_else(|| DetectorError::InvalidConfig("collector is required".to_string()))?;
        let model_store = self
            .model_store
            .ok_or_else(|| DetectorError::InvalidConfig("model store is required".to_string()))?;
        let alerter = self
            .alerter
            .unwrap_or_else(|| Arc::new(Alerter::new().with_dispatcher(Arc::new(LogDispatcher))));

        let logger = StructuredLogger::new(self.config.node_name.clone());
        let metrics = MonitorMetrics::new();

        let state = match model_store.load() {
            Ok(Some(model)) => MonitorState::Collecting.trained(model.detector),
            Ok(None) => MonitorState::Collecting,
            Err(DetectorError::CorruptModel(reason)) => {
                logger.log_model_discarded(&reason);
                MonitorState::Collecting
            }
            Err(e) => return Err(e),
        };

        let mut buffer = HistoryBuffer::new(self.config.history_capacity);
        if self.config.restore_history {
            if let Some(store) = &self.history_store {
                match store.read_tail(self.config.history_capacity) {
                    Ok(samples) => {
                        buffer.extend(samples);
                        if !buffer.is_empty() {
                            info!(
                                restored = buffer.len(),
                                path = %store.path().display(),
                                "Restored history from store"
                            );
                        }
                    }
                    Err(e) => warn!(
                        path = %store.path().display(),
                        error = %e,
                        "Could not restore history, starting with an empty buffer"
                    ),
                }
            }
        }

        metrics.set_history_size(buffer.len());
        metrics.set_model_trained(state.phase() == MonitorPhase::Trained);

        Ok(MonitorLoop {
            collector,
            alerter,
            model_store,
            history_store: self.history_store,
            audit_log: self.audit_log,
            health: self.health,
            config: self.config,
            buffer,
            state,
            metrics,
            logger,
            failed_collections: 0,
            last_score: None,
            last_tick: None,
            alerts: 0,
        })
    }
}

impl Default for MonitorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
