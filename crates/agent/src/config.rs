//! Agent configuration

use anyhow::{ensure, Context, Result};
use hostwatch_lib::anomaly::{DetectionPolicy, ForestConfig, SmtpSettings, DEFAULT_SMTP_PORT};
use hostwatch_lib::monitor::MonitorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Host name attached to logs and alerts
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Directory holding the model, history and audit files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub model_file: Option<PathBuf>,

    #[serde(default)]
    pub history_file: Option<PathBuf>,

    #[serde(default)]
    pub audit_log_file: Option<PathBuf>,

    /// Seconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Samples collected before the first fit
    #[serde(default = "default_training_threshold")]
    pub training_threshold: usize,

    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_contamination")]
    pub contamination: f64,

    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,

    /// Zero disables alert deduplication
    #[serde(default)]
    pub dedup_window_secs: u64,

    #[serde(default = "default_true")]
    pub restore_history: bool,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Mount point whose usage is reported as disk_percent
    #[serde(default = "default_disk_mount")]
    pub disk_mount: PathBuf,

    #[serde(default = "default_cpu_sample_window")]
    pub cpu_sample_window_ms: u64,

    /// Alertmanager-compatible webhook endpoint
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default)]
    pub smtp_host: Option<String>,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Recipient for email alerts; email is off unless both this and smtp_host are set
    #[serde(default)]
    pub alert_email: Option<String>,

    #[serde(default = "default_alert_from")]
    pub alert_from: String,

    /// Port for /healthz, /readyz and /metrics; no server when unset
    #[serde(default)]
    pub api_port: Option<u16>,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_tick_interval() -> u64 {
    60
}

fn default_history_capacity() -> usize {
    1000
}

fn default_training_threshold() -> usize {
    100
}

fn default_alert_threshold() -> f64 {
    hostwatch_lib::anomaly::DEFAULT_ALERT_THRESHOLD
}

fn default_n_estimators() -> usize {
    100
}

fn default_contamination() -> f64 {
    0.1
}

fn default_max_samples() -> usize {
    256
}

fn default_seed() -> u64 {
    42
}

fn default_dispatch_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_disk_mount() -> PathBuf {
    PathBuf::from("/")
}

fn default_cpu_sample_window() -> u64 {
    1000
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_alert_from() -> String {
    "hostwatch@localhost".to_string()
}

impl AgentConfig {
    /// Load configuration from an optional file, overridden by HOSTWATCH_* environment variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("HOSTWATCH").try_parsing(true))
            .build()
            .context("failed to read configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.dispatch_timeout_secs > 0,
            "dispatch_timeout_secs must be at least 1"
        );
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("model.bin"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("history.csv"))
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("audit.jsonl"))
    }

    pub fn forest_config(&self) -> ForestConfig {
        ForestConfig {
            n_estimators: self.n_estimators,
            contamination: self.contamination,
            max_samples: self.max_samples,
            seed: self.seed,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.tick_interval_secs),
            training_threshold: self.training_threshold,
            history_capacity: self.history_capacity,
            restore_history: self.restore_history,
            forest: self.forest_config(),
            policy: DetectionPolicy::new(self.alert_threshold),
            node_name: self.node_name.clone(),
        }
    }

    /// SMTP settings when email alerting is fully configured
    pub fn smtp_settings(&self) -> Option<SmtpSettings> {
        match (&self.smtp_host, &self.alert_email) {
            (Some(host), Some(to)) => Some(SmtpSettings {
                host: host.clone(),
                port: self.smtp_port,
                from: self.alert_from.clone(),
                to: to.clone(),
            }),
            _ => None,
        }
    }
}
