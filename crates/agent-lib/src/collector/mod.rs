//! Host metrics collection
//!
//! This module provides the metric source the monitor loop pulls from. The
//! production collector reads the proc filesystem; tests substitute their own
//! [`MetricsCollector`] implementations.

mod procfs;

#[cfg(test)]
mod tests;

pub use procfs::{is_whole_disk, CpuTimes, IoCounters, ProcfsCollector, DEFAULT_CPU_SAMPLE_WINDOW};

use crate::error::Result;
use crate::models::MetricsSample;

pub use async_trait::async_trait;

/// Trait for metric source implementations
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Take one host-wide sample. Any unreadable counter fails the whole sample.
    async fn collect(&self) -> Result<MetricsSample>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "collector"
    }
}
