//! Host resource anomaly detection
//!
//! This crate provides the core functionality for:
//! - Host metrics collection from the proc filesystem
//! - Unsupervised outlier scoring with an isolation forest
//! - Alert fan-out to log, webhook and email dispatchers
//! - Local persistence of history, audit records and the trained model
//! - Health checks and observability

pub mod anomaly;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod storage;

pub use error::{DetectorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, MonitorStatus,
    ReadinessResponse,
};
pub use models::*;
pub use monitor::{MonitorConfig, MonitorLoop, MonitorLoopBuilder, MonitorPhase, TickOutcome};
pub use observability::{MonitorMetrics, StructuredLogger};
