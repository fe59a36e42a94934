//! The estimation engine: per-line smoothing, state detection, minute
//! aggregation and the offline watchdog behind one lock.
//!
//! Every public operation takes the lock once, reads one settings snapshot,
//! and does bounded work (at most the packets of one window per line), so
//! concurrent producers and the maintenance timer never block each other
//! for long.

use crate::config::{signed_secs, DetectionSettings, SettingsHandle};
use crate::core::aggregation::{ClosedMinute, MinuteAggregator};
use crate::core::detector::HysteresisDetector;
use crate::core::windowing::PacketWindow;
use crate::telemetry::{normalize_timestamp, unix_now, LineState, TelemetryPacket};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What one ingest produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IngestOutcome {
    /// Normalized packet timestamp, epoch seconds
    pub timestamp: i64,
    pub smoothed_speed: f64,
    pub state: LineState,
    pub state_changed: bool,
}

/// Read-only view of a line's runtime state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineSnapshot {
    pub line_id: String,
    pub smoothed_speed: f64,
    pub state: LineState,
    pub last_packet: Option<i64>,
    pub window_len: usize,
}

/// Runtime state of one line.
#[derive(Debug, Clone, Default)]
struct LineRuntime {
    window: PacketWindow,
    detector: HysteresisDetector,
    last_packet: Option<i64>,
    smoothed_speed: f64,
}

impl LineRuntime {
    fn ingest(&mut self, packet: TelemetryPacket, settings: &DetectionSettings) -> IngestOutcome {
        let now = packet.timestamp;
        self.window.push(packet, now, settings.window_secs);
        self.last_packet = Some(now);
        self.smoothed_speed = self.window.speed();

        let transition = self.detector.evaluate(self.smoothed_speed, now, settings);
        IngestOutcome {
            timestamp: now,
            smoothed_speed: self.smoothed_speed,
            state: transition.state,
            state_changed: transition.changed,
        }
    }

    fn is_offline(&self, now: i64, timeout_secs: u64) -> bool {
        self.last_packet
            .is_some_and(|last| now.saturating_sub(last) > signed_secs(timeout_secs))
    }

    /// Drop smoothing state; returns true when this stopped a running line.
    fn go_offline(&mut self) -> bool {
        self.window.clear();
        self.smoothed_speed = 0.0;
        self.detector.force_stop()
    }

    fn snapshot(&self, line_id: &str) -> LineSnapshot {
        LineSnapshot {
            line_id: line_id.to_string(),
            smoothed_speed: self.smoothed_speed,
            state: self.detector.state(),
            last_packet: self.last_packet,
            window_len: self.window.len(),
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    lines: HashMap<String, LineRuntime>,
    minutes: MinuteAggregator,
}

/// Shared smoothing and detection engine.
#[derive(Debug)]
pub struct Engine {
    settings: Arc<SettingsHandle>,
    inner: Mutex<EngineState>,
}

impl Engine {
    pub fn new(settings: Arc<SettingsHandle>) -> Self {
        Self {
            settings,
            inner: Mutex::new(EngineState::default()),
        }
    }

    /// Engine with default detection settings.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(SettingsHandle::default()))
    }

    pub fn settings(&self) -> &Arc<SettingsHandle> {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // Every mutation leaves the state consistent, so a panic elsewhere
        // while holding the lock does not invalidate it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest one validated packet.
    ///
    /// `timestamp` may be seconds or milliseconds; `None` means now.
    pub fn ingest(
        &self,
        line_id: &str,
        pulses: u64,
        duration_ms: u64,
        timestamp: Option<i64>,
    ) -> IngestOutcome {
        let ts = normalize_timestamp(timestamp, unix_now());
        self.ingest_packet(line_id, TelemetryPacket::new(pulses, duration_ms, ts))
    }

    /// Ingest a packet whose timestamp is already in seconds.
    pub fn ingest_packet(&self, line_id: &str, packet: TelemetryPacket) -> IngestOutcome {
        let settings = self.settings.snapshot();
        let mut state = self.lock();

        let line = state.lines.entry(line_id.to_string()).or_default();
        let outcome = line.ingest(packet, &settings);
        state
            .minutes
            .record(line_id, outcome.timestamp, outcome.smoothed_speed);

        if outcome.state_changed {
            tracing::debug!(
                line_id = %line_id,
                state = %outcome.state,
                speed = outcome.smoothed_speed,
                "state transition"
            );
        }
        outcome
    }

    /// Remove and return every minute bucket that closed before `now`.
    pub fn flush(&self, now: i64) -> Vec<ClosedMinute> {
        self.lock().minutes.flush(now)
    }

    /// Return minutes the store could not take so the next flush retries them.
    pub fn requeue(&self, minutes: Vec<ClosedMinute>) {
        let mut state = self.lock();
        for minute in minutes {
            state.minutes.requeue(minute);
        }
    }

    /// Offline sweep with the configured timeout.
    pub fn sweep(&self, now: i64) -> BTreeSet<String> {
        let timeout = self.settings.snapshot().offline_timeout_secs;
        self.sweep_with_timeout(now, timeout)
    }

    /// Reset every line silent for more than `timeout_secs` and return the
    /// ones that were running and have been forced to stopped.
    ///
    /// Lines that never sent a packet are left alone, as are silent lines
    /// that were already stopped (their smoothing state is still cleared).
    pub fn sweep_with_timeout(&self, now: i64, timeout_secs: u64) -> BTreeSet<String> {
        let mut state = self.lock();
        let mut changed = BTreeSet::new();

        for (line_id, line) in state.lines.iter_mut() {
            if !line.is_offline(now, timeout_secs) {
                continue;
            }
            if line.go_offline() {
                changed.insert(line_id.clone());
            }
        }
        changed
    }

    pub fn smoothed_speed(&self, line_id: &str) -> f64 {
        self.lock()
            .lines
            .get(line_id)
            .map_or(0.0, |l| l.smoothed_speed)
    }

    pub fn state(&self, line_id: &str) -> LineState {
        self.lock()
            .lines
            .get(line_id)
            .map_or(LineState::Stopped, |l| l.detector.state())
    }

    pub fn snapshot(&self, line_id: &str) -> Option<LineSnapshot> {
        self.lock().lines.get(line_id).map(|l| l.snapshot(line_id))
    }

    /// Ids of every line that has sent at least one packet, sorted.
    pub fn line_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().lines.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of minute buckets not yet flushed.
    pub fn pending_minutes(&self) -> usize {
        self.lock().minutes.pending()
    }
}
