//! Core estimation for the line monitor.
//!
//! This module contains:
//! - The sliding packet window that turns raw pulse counts into a speed
//! - Hysteresis run/stop detection
//! - Per-minute speed aggregation for charts
//! - The engine tying those together per line, plus the offline sweep
//! - Work/idle segment reconstruction from the status log

pub mod aggregation;
pub mod detector;
pub mod engine;
pub mod segments;
pub mod windowing;

// Re-export commonly used types
pub use aggregation::{minute_floor, ClosedMinute, MinuteAggregator};
pub use detector::{HysteresisDetector, Transition};
pub use engine::{Engine, IngestOutcome, LineSnapshot};
pub use segments::{
    day_label, hours, merge_short_segments, DaySegments, DayWindow, ReconstructOptions,
    Reconstruction, Segment, SegmentReconstructor, StatusEvent, SECONDS_PER_DAY,
};
pub use windowing::PacketWindow;
