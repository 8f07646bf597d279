//! Local persistence for the monitor
//!
//! This module provides:
//! - The bounded in-memory history buffer used as the training corpus
//! - The CSV history store appended once per tick
//! - The JSON-lines audit log of scored samples and alerts
//! - Atomic, checksummed persistence of the trained detector

mod audit;
mod buffer;
mod history;
mod model_store;

pub use audit::{AuditKind, AuditLog, AuditRecord};
pub use buffer::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
pub use history::HistoryStore;
pub use model_store::{ModelStore, PersistedModel, MODEL_FORMAT_VERSION};
