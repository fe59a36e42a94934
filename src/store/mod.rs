//! Persistence for raw packets, the status log and minute statistics.
//!
//! The estimation core never touches a store; the monitor service writes
//! through a [`TelemetryStore`] and retries failed work on its next cycle.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};

use crate::core::StatusEvent;
use crate::telemetry::TelemetryPacket;
use std::sync::Arc;
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Durable storage used by the monitor.
pub trait TelemetryStore: Send + Sync {
    /// Append a raw packet to the write-ahead log.
    fn append_packet(&self, line_id: &str, packet: &TelemetryPacket) -> Result<(), StoreError>;

    /// Append one state transition.
    fn append_status_event(&self, event: &StatusEvent) -> Result<(), StoreError>;

    /// Events of a line with `from <= timestamp <= to`, oldest first.
    fn status_events(
        &self,
        line_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StatusEvent>, StoreError>;

    /// The newest event of a line with `timestamp < before`.
    fn last_status_before(
        &self,
        line_id: &str,
        before: i64,
    ) -> Result<Option<StatusEvent>, StoreError>;

    /// Write the average speed of one minute, replacing any earlier value.
    fn upsert_minute(&self, line_id: &str, minute: i64, average: f64) -> Result<(), StoreError>;

    /// `(minute, average)` pairs with `from <= minute <= to`, oldest first.
    fn minute_averages(
        &self,
        line_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<(i64, f64)>, StoreError>;
}

/// Thread-safe shared store.
pub type SharedStore = Arc<dyn TelemetryStore>;
