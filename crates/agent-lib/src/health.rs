//! Health and readiness reporting for the host monitor
//!
//! The monitor loop publishes per-component status plus a snapshot of its own
//! progress here; the agent binary serves both over HTTP.

use crate::monitor::MonitorPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational: collecting training data, or a dispatcher failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Progress snapshot published by the monitor loop after every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub phase: MonitorPhase,
    pub buffered: usize,
    pub training_threshold: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<DateTime<Utc>>,
    pub alerts: u64,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            phase: MonitorPhase::Collecting,
            buffered: 0,
            training_threshold: 0,
            last_score: None,
            last_tick: None,
            alerts: 0,
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub monitor: MonitorStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Overall status is the worst component status
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessResponse {
    fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            reason: Some(reason.into()),
        }
    }
}

/// Component names for health tracking
pub mod components {
    pub const COLLECTOR: &str = "collector";
    pub const DETECTOR: &str = "detector";
    pub const MODEL_STORE: &str = "model_store";
    pub const ALERTER: &str = "alerter";

    /// Every component the monitor registers at startup
    pub const ALL: [&str; 4] = [COLLECTOR, DETECTOR, MODEL_STORE, ALERTER];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    monitor: MonitorStatus,
    running: bool,
}

/// Shared, cloneable view of component health and monitor progress
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut state = self.state.write().await;
        // Keep `since` stable while the status does not change
        if let Some(current) = state.components.get(name) {
            if current.status == health.status && current.message == health.message {
                return;
            }
        }
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Mark whether the monitor loop is currently running
    pub async fn set_running(&self, running: bool) {
        self.state.write().await.running = running;
    }

    pub async fn publish(&self, status: MonitorStatus) {
        self.state.write().await.monitor = status;
    }

    pub async fn monitor_status(&self) -> MonitorStatus {
        self.state.read().await.monitor.clone()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: HealthResponse::compute_status(&state.components),
            monitor: state.monitor.clone(),
            components: state.components.clone(),
        }
    }

    /// Ready while the loop runs and no component is unhealthy. A monitor
    /// still collecting training data is ready.
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if !state.running || state.monitor.phase == MonitorPhase::Stopped {
            return ReadinessResponse::not_ready("monitor loop is not running");
        }

        let mut failing: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, health)| !health.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        if !failing.is_empty() {
            failing.sort_unstable();
            return ReadinessResponse::not_ready(format!("unhealthy: {}", failing.join(", ")));
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
