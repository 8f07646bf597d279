//! The monitor: a periodic collect, record, train, score and alert cycle
//!
//! This module provides:
//! - The lifecycle state machine ([`MonitorState`])
//! - The tick-driven loop and its builder ([`MonitorLoop`])
//! - One-shot training from the persisted history ([`train_from_history`])

mod r#loop;
mod state;
mod training;

#[cfg(test)]
mod tests;

pub use r#loop::{
    MonitorConfig, MonitorLoop, MonitorLoopBuilder, TickOutcome, COLLECTOR_UNHEALTHY_AFTER,
    DEFAULT_TRAINING_THRESHOLD,
};
pub use state::{MonitorPhase, MonitorState};
pub use training::{train_from_history, TrainingReport};
