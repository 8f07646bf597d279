//! Alert emission for anomalous samples
//!
//! Handles:
//! - Formatting the operator-facing alert message
//! - Delivering it through every configured dispatcher (log, webhook, email)
//! - Bounding each delivery with a timeout
//! - Optional deduplication of alerts within a configurable window

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DetectorError, Result};
use crate::models::{MetricsSample, FEATURE_NAMES};

/// Default per-dispatcher delivery timeout
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default SMTP relay port
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Destination for alert notifications
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    /// Deliver one alert
    async fn send(&self, sample: &MetricsSample, score: f64) -> Result<()>;
}

/// Subject line shared by all transports
pub fn alert_subject(node_name: &str) -> String {
    format!("Resource anomaly detected on {}", node_name)
}

/// Human-readable alert body: time, score and every metric
pub fn format_alert_message(sample: &MetricsSample, score: f64) -> String {
    let mut message = format!(
        "ANOMALY DETECTED at {}\nAnomaly score: {:.4}\n\nCurrent metrics:\n",
        sample.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        score
    );
    for (name, value) in FEATURE_NAMES.iter().zip(sample.values()) {
        message.push_str(&format!("  {}: {:.2}\n", name, value));
    }
    message
}

/// Writes the alert to the structured log
pub struct LogDispatcher;

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, sample: &MetricsSample, score: f64) -> Result<()> {
        warn!(
            event = "alert",
            score = score,
            cpu_percent = sample.cpu_percent,
            memory_percent = sample.memory_percent,
            disk_percent = sample.disk_percent,
            load_avg = sample.load_avg,
            "{}",
            format_alert_message(sample, score)
        );
        Ok(())
    }
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// Alert status (always firing; resolution is not tracked)
    pub status: String,
    /// Alert labels for routing and grouping
    pub labels: HashMap<String, String>,
    /// Alert annotations with details
    pub annotations: HashMap<String, String>,
    /// Start time in RFC3339 format
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

/// Alertmanager webhook payload (array of alerts)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

impl AlertmanagerAlert {
    /// Build a firing alert for one anomalous sample
    pub fn from_sample(node_name: &str, sample: &MetricsSample, score: f64) -> Self {
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), "HostResourceAnomaly".to_string());
        labels.insert("severity".to_string(), "warning".to_string());
        labels.insert("node".to_string(), node_name.to_string());

        let mut annotations = HashMap::new();
        annotations.insert("summary".to_string(), alert_subject(node_name));
        annotations.insert(
            "description".to_string(),
            format_alert_message(sample, score),
        );
        annotations.insert("score".to_string(), format!("{:.4}", score));
        for (name, value) in FEATURE_NAMES.iter().zip(sample.values()) {
            annotations.insert(name.to_string(), format!("{:.2}", value));
        }

        Self {
            status: "firing".to_string(),
            labels,
            annotations,
            starts_at: sample.timestamp.to_rfc3339(),
            ends_at: None,
            generator_url: None,
        }
    }
}

/// POSTs an Alertmanager-compatible payload to a webhook URL
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
    node_name: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, node_name: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_DISPATCH_TIMEOUT)
            .build()
            .map_err(|e| DetectorError::InvalidConfig(format!("webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            node_name: node_name.into(),
        })
    }

    pub fn payload(&self, sample: &MetricsSample, score: f64) -> AlertmanagerPayload {
        AlertmanagerPayload {
            alerts: vec![AlertmanagerAlert::from_sample(&self.node_name, sample, score)],
        }
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, sample: &MetricsSample, score: f64) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(sample, score))
            .send()
            .await
            .map_err(|e| DetectorError::Dispatch(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::Dispatch(format!(
                "webhook returned HTTP {}",
                status
            )));
        }
        Ok(())
    }
}

/// SMTP settings for [`EmailDispatcher`]
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub to: String,
}

/// Sends the alert body as a plain-text email through an SMTP relay
pub struct EmailDispatcher {
    settings: SmtpSettings,
    node_name: String,
}

impl EmailDispatcher {
    pub fn new(settings: SmtpSettings, node_name: impl Into<String>) -> Self {
        Self {
            settings,
            node_name: node_name.into(),
        }
    }

    pub fn build_message(&self, sample: &MetricsSample, score: f64) -> Result<Message> {
        let from = self
            .settings
            .from
            .parse::<Mailbox>()
            .map_err(|e| DetectorError::Dispatch(format!("invalid sender address: {}", e)))?;
        let to = self
            .settings
            .to
            .parse::<Mailbox>()
            .map_err(|e| DetectorError::Dispatch(format!("invalid recipient address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(alert_subject(&self.node_name))
            .header(ContentType::TEXT_PLAIN)
            .body(format_alert_message(sample, score))
            .map_err(|e| DetectorError::Dispatch(format!("failed to build email: {}", e)))
    }

    fn transport(&self) -> AsyncSmtpTransport<Tokio1Executor> {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.settings.host)
            .port(self.settings.port)
            .timeout(Some(DEFAULT_DISPATCH_TIMEOUT))
            .build()
    }
}

#[async_trait]
impl AlertDispatcher for EmailDispatcher {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, sample: &MetricsSample, score: f64) -> Result<()> {
        let email = self.build_message(sample, score)?;
        self.transport()
            .send(email)
            .await
            .map_err(|e| DetectorError::Dispatch(format!("smtp send failed: {}", e)))?;
        Ok(())
    }
}

/// Result of fanning one alert out to the dispatchers
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    /// Dispatchers that accepted the alert
    pub delivered: Vec<String>,
    /// Dispatchers that failed or timed out, with the reason
    pub failed: Vec<(String, String)>,
    /// True when the dedup window swallowed the alert
    pub suppressed: bool,
}

impl DispatchReport {
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Alert fan-out with per-dispatcher timeout and deduplication
pub struct Alerter {
    dispatchers: Vec<Arc<dyn AlertDispatcher>>,
    timeout: Duration,
    /// Zero disables deduplication
    dedup_window: Duration,
    last_alert: Mutex<Option<Instant>>,
}

impl Default for Alerter {
    fn default() -> Self {
        Self::new()
    }
}

impl Alerter {
    /// Create an alerter with no dispatchers and deduplication off
    pub fn new() -> Self {
        Self {
            dispatchers: Vec::new(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            dedup_window: Duration::ZERO,
            last_alert: Mutex::new(None),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn AlertDispatcher>) -> Self {
        self.dispatchers.push(dispatcher);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn dispatcher_names(&self) -> Vec<String> {
        self.dispatchers.iter().map(|d| d.name().to_string()).collect()
    }

    /// Check if an alert now would fall inside the dedup window
    pub fn should_suppress(&self) -> bool {
        if self.dedup_window.is_zero() {
            return false;
        }
        let last = self.last_alert.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*last, Some(at) if at.elapsed() < self.dedup_window)
    }

    fn record_alert(&self) {
        let mut last = self.last_alert.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(Instant::now());
    }

    /// Deliver an alert to every dispatcher. Failures are collected, never raised.
    pub async fn dispatch(&self, sample: &MetricsSample, score: f64) -> DispatchReport {
        let mut report = DispatchReport::default();

        if self.should_suppress() {
            debug!(score = score, "Alert suppressed by dedup window");
            report.suppressed = true;
            return report;
        }

        for dispatcher in &self.dispatchers {
            let name = dispatcher.name().to_string();
            match tokio::time::timeout(self.timeout, dispatcher.send(sample, score)).await {
                Ok(Ok(())) => report.delivered.push(name),
                Ok(Err(e)) => report.failed.push((name, e.to_string())),
                Err(_) => report.failed.push((
                    name,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                )),
            }
        }

        self.record_alert();
        report
    }
}
