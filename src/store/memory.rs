//! In-memory store for tests and offline replay.

use super::{StoreError, TelemetryStore};
use crate::core::StatusEvent;
use crate::telemetry::TelemetryPacket;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    packets: Vec<(String, TelemetryPacket)>,
    events: Vec<StatusEvent>,
    minutes: BTreeMap<(String, i64), f64>,
}

/// Store that keeps everything in process memory.
///
/// It can be switched offline to exercise the retry paths of the monitor.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn packet_count(&self) -> usize {
        self.state.lock().map(|s| s.packets.len()).unwrap_or(0)
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().map(|s| s.events.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore for MemoryStore {
    fn append_packet(&self, line_id: &str, packet: &TelemetryPacket) -> Result<(), StoreError> {
        self.state()?.packets.push((line_id.to_string(), *packet));
        Ok(())
    }

    fn append_status_event(&self, event: &StatusEvent) -> Result<(), StoreError> {
        self.state()?.events.push(event.clone());
        Ok(())
    }

    fn status_events(
        &self,
        line_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StatusEvent>, StoreError> {
        let mut events: Vec<StatusEvent> = self
            .state()?
            .events
            .iter()
            .filter(|e| e.line_id == line_id && e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect();
        // Stable: same-second events keep insertion order
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    fn last_status_before(
        &self,
        line_id: &str,
        before: i64,
    ) -> Result<Option<StatusEvent>, StoreError> {
        let state = self.state()?;
        let mut last: Option<&StatusEvent> = None;
        for event in state
            .events
            .iter()
            .filter(|e| e.line_id == line_id && e.timestamp < before)
        {
            if last.map_or(true, |l| event.timestamp >= l.timestamp) {
                last = Some(event);
            }
        }
        Ok(last.cloned())
    }

    fn upsert_minute(&self, line_id: &str, minute: i64, average: f64) -> Result<(), StoreError> {
        self.state()?
            .minutes
            .insert((line_id.to_string(), minute), average);
        Ok(())
    }

    fn minute_averages(
        &self,
        line_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let state = self.state()?;
        let lo = (line_id.to_string(), from);
        let hi = (line_id.to_string(), to);
        Ok(state
            .minutes
            .range(lo..=hi)
            .map(|((_, minute), avg)| (*minute, *avg))
            .collect())
    }
}
