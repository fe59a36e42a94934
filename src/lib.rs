//! Line Monitor - production line telemetry and work/idle accounting.
//!
//! Line controllers post pulse counts measured over short intervals. The
//! monitor turns them into a smoothed speed per line, debounces that speed
//! into a RUNNING/STOPPED state, keeps minute-resolution speed history for
//! charts, and rebuilds per-day work and idle time from the logged state
//! transitions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Line Monitor                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Server    │──▶│   Monitor   │──▶│   Engine    │       │
//! │  │ (POST /data)│   │ (validate)  │   │ (smoothing, │       │
//! │  └─────────────┘   └─────────────┘   │  hysteresis)│       │
//! │                          │           └─────────────┘       │
//! │                          ▼                  │              │
//! │  ┌─────────────┐   ┌─────────────┐          ▼              │
//! │  │ Maintenance │──▶│    Store    │◀── minute averages,     │
//! │  │   worker    │   │  (SQLite)   │    status events        │
//! │  └─────────────┘   └─────────────┘                         │
//! │                          │                                 │
//! │                          ▼                                 │
//! │                   ┌─────────────┐                          │
//! │                   │  Segment    │──▶ charts, reports       │
//! │                   │Reconstructor│                          │
//! │                   └─────────────┘                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use line_monitor::{Config, MemoryStore, Monitor, PacketInput};
//!
//! let monitor = Monitor::new(Config::default(), Arc::new(MemoryStore::new()));
//! let outcome = monitor
//!     .handle_packet_at(&PacketInput::new("line1", 12, 1_000, Some(1_000)), 1_000)
//!     .unwrap();
//! assert!(outcome.smoothed_speed > 0.0);
//! ```

pub mod config;
pub mod core;
pub mod monitor;
pub mod report;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod worker;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, DetectionSettings, SettingsHandle, SettingsPatch};
pub use core::{Engine, IngestOutcome, SegmentReconstructor, StatusEvent};
pub use monitor::{LineStatus, MaintenanceReport, Monitor, MonitorError, PacketInput, StatusLabel};
pub use stats::{IngestStats, SharedStats, StatsSnapshot};
pub use store::{MemoryStore, SharedStore, SqliteStore, StoreError, TelemetryStore};
pub use telemetry::{LineState, TelemetryPacket};
pub use worker::MaintenanceWorker;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
