//! Packet and state types shared by the smoothing engine and the stores.
//!
//! All timestamps are epoch seconds (`i64`). Controllers may send
//! milliseconds; those are normalized on the way in.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Timestamps above this value are interpreted as epoch milliseconds.
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Current wall-clock time in epoch seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Normalize an optional packet timestamp to epoch seconds.
///
/// Missing timestamps take the supplied `now`; millisecond values are
/// truncated to whole seconds.
pub fn normalize_timestamp(raw: Option<i64>, now: i64) -> i64 {
    match raw {
        Some(ts) if ts > MILLIS_THRESHOLD => ts / 1000,
        Some(ts) => ts,
        None => now,
    }
}

/// One pulse-count measurement from a line controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPacket {
    /// Pulses counted during the measurement
    pub pulses: u64,
    /// Length of the measurement in milliseconds
    pub duration_ms: u64,
    /// Epoch seconds when the packet was taken
    pub timestamp: i64,
}

impl TelemetryPacket {
    pub fn new(pulses: u64, duration_ms: u64, timestamp: i64) -> Self {
        Self {
            pulses,
            duration_ms,
            timestamp,
        }
    }
}

/// Debounced operating state of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    #[default]
    Stopped,
    Running,
}

impl LineState {
    pub fn from_running(is_running: bool) -> Self {
        if is_running {
            LineState::Running
        } else {
            LineState::Stopped
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, LineState::Running)
    }

    /// The opposite state.
    pub fn flipped(self) -> Self {
        match self {
            LineState::Running => LineState::Stopped,
            LineState::Stopped => LineState::Running,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineState::Running => "running",
            LineState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
