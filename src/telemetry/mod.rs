//! Telemetry input types for the line monitor.
//!
//! Packets are produced by line controllers (one logical stream per line)
//! and carry a pulse count observed over a measurement duration.

pub mod types;

// Re-export commonly used types
pub use types::{normalize_timestamp, unix_now, LineState, TelemetryPacket, MILLIS_THRESHOLD};
