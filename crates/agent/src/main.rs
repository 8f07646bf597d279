//! hostwatch - host resource anomaly detection agent
//!
//! Samples host-wide resource usage on a fixed interval, learns what normal
//! looks like from the first samples it sees, and alerts on outliers.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hostwatch_lib::{
    anomaly::{Alerter, EmailDispatcher, LogDispatcher, WebhookDispatcher},
    collector::ProcfsCollector,
    error::DetectorError,
    health::HealthRegistry,
    monitor::{train_from_history, MonitorLoopBuilder, MonitorPhase},
    observability::StructuredLogger,
    storage::{AuditLog, HistoryStore, ModelStore},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Parser)]
#[command(name = "hostwatch", version, about = "Host resource anomaly detection agent")]
struct Cli {
    /// Train a model from the history file and exit
    #[arg(long)]
    train: bool,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "HOSTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,

    /// Seconds between samples (overrides the configuration)
    #[arg(long)]
    interval: Option<u64>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = if cli.train {
        run_training(&cli)
    } else {
        run_monitor(&cli).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "hostwatch exited with an error");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<config::AgentConfig> {
    let mut config = config::AgentConfig::load(cli.config.as_deref())?;
    if let Some(secs) = cli.interval {
        config.tick_interval_secs = secs;
    }
    Ok(config)
}

/// Train-only mode: fit on the persisted history, save, and exit
fn run_training(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let history = HistoryStore::new(config.history_path());
    let models = ModelStore::new(config.model_path());

    info!(history = %history.path().display(), "Training model from history");

    match train_from_history(&history, &models, config.forest_config()) {
        Ok(report) => {
            println!(
                "Model trained on {} samples and saved to {}",
                report.samples,
                report.path.display()
            );
            Ok(())
        }
        Err(DetectorError::InsufficientData {
            required,
            available,
        }) => anyhow::bail!(
            "not enough history to train: {} has {} samples, at least {} are required",
            history.path().display(),
            available,
            required
        ),
        Err(e) => Err(e).context("training failed"),
    }
}

fn build_alerter(config: &config::AgentConfig) -> Result<Alerter> {
    let mut alerter = Alerter::new()
        .with_timeout(Duration::from_secs(config.dispatch_timeout_secs))
        .with_dedup_window(Duration::from_secs(config.dedup_window_secs))
        .with_dispatcher(Arc::new(LogDispatcher));

    if let Some(url) = &config.webhook_url {
        let webhook = WebhookDispatcher::new(url.clone(), config.node_name.clone())
            .context("failed to create webhook dispatcher")?;
        alerter = alerter.with_dispatcher(Arc::new(webhook));
    }
    if let Some(settings) = config.smtp_settings() {
        alerter = alerter.with_dispatcher(Arc::new(EmailDispatcher::new(
            settings,
            config.node_name.clone(),
        )));
    }

    Ok(alerter)
}

async fn run_monitor(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let logger = StructuredLogger::new(config.node_name.clone());

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.data_dir.display()
        )
    })?;

    let collector = ProcfsCollector::new(&config.proc_root, &config.disk_mount)
        .with_cpu_sample_window(Duration::from_millis(config.cpu_sample_window_ms));
    if !collector.is_available().await {
        warn!(
            proc_root = %config.proc_root.display(),
            "Proc filesystem not readable, every tick will fail until it is"
        );
    }

    let alerter = build_alerter(&config)?;
    info!(dispatchers = ?alerter.dispatcher_names(), "Alerting configured");

    let health_registry = HealthRegistry::new();
    let mut monitor = MonitorLoopBuilder::new()
        .config(config.monitor_config())
        .collector(Arc::new(collector))
        .alerter(Arc::new(alerter))
        .model_store(ModelStore::new(config.model_path()))
        .history_store(HistoryStore::new(config.history_path()))
        .audit_log(AuditLog::new(config.audit_log_path()))
        .health(health_registry.clone())
        .build()
        .context("failed to start monitor")?;

    logger.log_startup(AGENT_VERSION, monitor.phase() == MonitorPhase::Trained);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let api_handle = config.api_port.map(|port| {
        let state = Arc::new(api::AppState::new(health_registry, config.node_name.clone()));
        let api_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state, api_shutdown).await {
                error!(error = %format!("{:#}", e), "API server failed");
            }
        })
    });

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    monitor.run(shutdown_rx).await;

    if let Some(handle) = api_handle {
        let _ = handle.await;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            info!("SIGINT received");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Ctrl-C received");
}
