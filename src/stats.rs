//! Cumulative ingest statistics.
//!
//! Counters are lock-free so every request path can bump them; a snapshot
//! is persisted as JSON under the data directory and reloaded on start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// File name of the persisted counters inside `data_path`.
pub const STATS_FILE: &str = "stats.json";

/// Ingest counters for the running process.
#[derive(Debug)]
pub struct IngestStats {
    /// Packets accepted by the monitor
    packets: AtomicU64,
    /// Packets rejected by validation
    rejected: AtomicU64,
    /// State transitions detected on ingest
    transitions: AtomicU64,
    /// Minute averages written to the store
    minutes_flushed: AtomicU64,
    /// Lines forced to stopped by the offline sweep
    offline_stops: AtomicU64,
    /// Failed store operations
    store_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            packets: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            minutes_flushed: AtomicU64::new(0),
            offline_stops: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Counters backed by a JSON file; earlier totals are loaded if present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous ingest stats");
        }

        stats
    }

    pub fn record_packet(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_minutes_flushed(&self, count: u64) {
        self.minutes_flushed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_offline_stops(&self, count: u64) {
        self.offline_stops.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            minutes_flushed: self.minutes_flushed.load(Ordering::Relaxed),
            offline_stops: self.offline_stops.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Ingest Statistics:\n\
             - Packets accepted: {}\n\
             - Packets rejected: {}\n\
             - State transitions: {}\n\
             - Minutes flushed: {}\n\
             - Offline stops: {}\n\
             - Store failures: {}\n\
             - Session duration: {} seconds",
            stats.packets,
            stats.rejected,
            stats.transitions,
            stats.minutes_flushed,
            stats.offline_stops,
            stats.store_failures,
            stats.session_duration_secs
        )
    }

    /// Save counters to disk; a no-op without a persistence path.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                packets: stats.packets,
                rejected: stats.rejected,
                transitions: stats.transitions,
                minutes_flushed: stats.minutes_flushed,
                offline_stops: stats.offline_stops,
                store_failures: stats.store_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.packets.store(persisted.packets, Ordering::Relaxed);
                self.rejected.store(persisted.rejected, Ordering::Relaxed);
                self.transitions
                    .store(persisted.transitions, Ordering::Relaxed);
                self.minutes_flushed
                    .store(persisted.minutes_flushed, Ordering::Relaxed);
                self.offline_stops
                    .store(persisted.offline_stops, Ordering::Relaxed);
                self.store_failures
                    .store(persisted.store_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub rejected: u64,
    pub transitions: u64,
    pub minutes_flushed: u64,
    pub offline_stops: u64,
    pub store_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    packets: u64,
    #[serde(default)]
    rejected: u64,
    transitions: u64,
    minutes_flushed: u64,
    offline_stops: u64,
    store_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedStats = Arc<IngestStats>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = IngestStats::new();
        stats.record_packet();
        stats.record_packet();
        stats.record_transition();
        stats.record_minutes_flushed(5);

        let snap = stats.snapshot();
        assert_eq!(snap.packets, 2);
        assert_eq!(snap.transitions, 1);
        assert_eq!(snap.minutes_flushed, 5);
        assert_eq!(snap.store_failures, 0);
    }

    #[test]
    fn test_summary_format() {
        let summary = IngestStats::new().summary();
        assert!(summary.contains("Packets accepted"));
        assert!(summary.contains("Offline stops"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATS_FILE);

        let stats = IngestStats::with_persistence(path.clone());
        stats.record_packet();
        stats.record_offline_stops(3);
        stats.save().unwrap();

        let reloaded = IngestStats::with_persistence(path);
        let snap = reloaded.snapshot();
        assert_eq!(snap.packets, 1);
        assert_eq!(snap.offline_stops, 3);
    }
}
