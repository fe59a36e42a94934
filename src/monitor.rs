//! The monitor service.
//!
//! Validates incoming packets, drives the [`Engine`], writes the status log
//! and minute statistics through a [`TelemetryStore`], and answers the
//! dashboard and report queries. Store failures never lose in-memory state:
//! status events wait in a pending queue and unflushed minutes go back into
//! the aggregator until the next maintenance cycle.

use crate::config::{signed_secs, Config, ConfigError, DetectionSettings, SettingsHandle, SettingsPatch};
use crate::core::{
    minute_floor, DayWindow, Engine, IngestOutcome, ReconstructOptions, Reconstruction,
    SegmentReconstructor, StatusEvent, SECONDS_PER_DAY,
};
use crate::report::{
    rfc3339_label, MAX_REPORT_DAYS, ChartData, DailyLineReport, DailyReport, DailyWorkIdle, LineReport, Report,
    Series, StatusChart,
};
use crate::stats::{IngestStats, SharedStats};
use crate::store::{SharedStore, StoreError};
use crate::telemetry::{normalize_timestamp, unix_now, LineState, TelemetryPacket};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Status events held in memory while the store is down.
pub const MAX_PENDING_EVENTS: usize = 10_000;

/// Monitor errors.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// A packet as posted by a line controller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInput {
    #[serde(rename = "lineId", alias = "line_id")]
    pub line_id: String,
    pub pulses: i64,
    /// Measurement length in milliseconds
    #[serde(rename = "duration", alias = "duration_ms")]
    pub duration_ms: i64,
    /// Epoch seconds or milliseconds; receive time when absent
    #[serde(rename = "ts", alias = "timestamp", default)]
    pub timestamp: Option<i64>,
}

impl PacketInput {
    pub fn new(line_id: impl Into<String>, pulses: i64, duration_ms: i64, timestamp: Option<i64>) -> Self {
        Self {
            line_id: line_id.into(),
            pulses,
            duration_ms,
            timestamp,
        }
    }

    /// Lenient parse of a JSON packet: numbers may arrive as strings or
    /// floats, and the line id may be numeric.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, MonitorError> {
        let line_id = match value.get("lineId").or_else(|| value.get("line_id")) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let pulses = int_field(value, &["pulses"])?
            .ok_or_else(|| MonitorError::InvalidInput("missing pulses".to_string()))?;
        let duration_ms = int_field(value, &["duration", "duration_ms"])?
            .ok_or_else(|| MonitorError::InvalidInput("missing duration".to_string()))?;
        let timestamp = int_field(value, &["ts", "timestamp"])?;

        Ok(Self {
            line_id,
            pulses,
            duration_ms,
            timestamp,
        })
    }
}

fn int_field(value: &serde_json::Value, keys: &[&str]) -> Result<Option<i64>, MonitorError> {
    let Some(field) = keys.iter().find_map(|k| value.get(*k)) else {
        return Ok(None);
    };
    let parsed = match field {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| MonitorError::InvalidInput(format!("{} is not a number", keys[0])))
}

/// Dashboard label of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLabel {
    /// Never seen, or silent for longer than the offline timeout
    NoData,
    Running,
    Stopped,
}

/// Current status of one configured line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineStatus {
    pub line_id: String,
    pub display_name: String,
    pub speed: f64,
    pub is_running: bool,
    pub last_packet_time: Option<i64>,
    pub state_label: StatusLabel,
    pub product: String,
}

/// What one maintenance cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub events_retried: usize,
    pub events_pending: usize,
    pub minutes_flushed: usize,
    pub minutes_requeued: usize,
    /// Lines forced to stopped by the offline sweep
    pub forced_offline: Vec<String>,
}

/// Ingest, persistence and query service for all lines.
pub struct Monitor {
    engine: Engine,
    store: SharedStore,
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    stats: SharedStats,
    pending: Mutex<VecDeque<StatusEvent>>,
    pending_limit: usize,
}

impl Monitor {
    pub fn new(config: Config, store: SharedStore) -> Self {
        let settings = Arc::new(SettingsHandle::new(config.detection.clone()));
        Self {
            engine: Engine::new(settings),
            store,
            config: RwLock::new(config),
            config_path: None,
            stats: Arc::new(IngestStats::new()),
            pending: Mutex::new(VecDeque::new()),
            pending_limit: MAX_PENDING_EVENTS,
        }
    }

    /// Persist settings changes to, and hot-reload from, this file.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Cap on queued status events; the oldest is dropped beyond it.
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit.max(1);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Current detection settings snapshot.
    pub fn settings(&self) -> Arc<DetectionSettings> {
        self.engine.settings().snapshot()
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> Config {
        self.config_read().clone()
    }

    fn config_read(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_write(&self) -> RwLockWriteGuard<'_, Config> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_lock(&self) -> MutexGuard<'_, VecDeque<StatusEvent>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status events waiting to be written.
    pub fn pending_events(&self) -> usize {
        self.pending_lock().len()
    }

    fn product(&self, line_id: &str) -> Option<String> {
        self.config_read().product(line_id)
    }

    /// Validate, log and ingest one packet received now.
    pub fn handle_packet(&self, input: &PacketInput) -> Result<IngestOutcome, MonitorError> {
        self.handle_packet_at(input, unix_now())
    }

    /// Validate, log and ingest one packet; `now` stands in for a missing
    /// timestamp.
    pub fn handle_packet_at(
        &self,
        input: &PacketInput,
        now: i64,
    ) -> Result<IngestOutcome, MonitorError> {
        let packet = match validate(input, now) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.record_rejected();
                return Err(e);
            }
        };
        let line_id = input.line_id.trim();

        if let Err(e) = self.store.append_packet(line_id, &packet) {
            self.stats.record_store_failure();
            tracing::warn!(line_id = %line_id, error = %e, "failed to log raw packet");
        }

        let outcome = self.engine.ingest_packet(line_id, packet);
        self.stats.record_packet();

        if outcome.state_changed {
            self.stats.record_transition();
            tracing::info!(
                line_id = %line_id,
                state = %outcome.state,
                speed = outcome.smoothed_speed,
                "line state changed"
            );
            let event = StatusEvent::new(line_id, outcome.timestamp, outcome.state)
                .with_product(self.product(line_id));
            self.log_status(event);
        }

        Ok(outcome)
    }

    /// Write a status event, or queue it behind events still waiting so the
    /// log keeps its order.
    fn log_status(&self, event: StatusEvent) {
        let mut pending = self.pending_lock();
        if pending.is_empty() {
            match self.store.append_status_event(&event) {
                Ok(()) => return,
                Err(e) => {
                    self.stats.record_store_failure();
                    tracing::warn!(
                        line_id = %event.line_id,
                        error = %e,
                        "failed to log status event, queued for retry"
                    );
                }
            }
        }

        if pending.len() >= self.pending_limit {
            if let Some(dropped) = pending.pop_front() {
                tracing::warn!(
                    line_id = %dropped.line_id,
                    timestamp = dropped.timestamp,
                    limit = self.pending_limit,
                    "pending status queue full, dropping oldest event"
                );
            }
        }
        pending.push_back(event);
    }

    /// Write queued status events in order, stopping at the first failure.
    fn retry_pending(&self) -> usize {
        let mut pending = self.pending_lock();
        let mut written = 0;
        while let Some(event) = pending.front() {
            if let Err(e) = self.store.append_status_event(event) {
                self.stats.record_store_failure();
                tracing::warn!(error = %e, pending = pending.len(), "status log still unavailable");
                break;
            }
            pending.pop_front();
            written += 1;
        }
        written
    }

    /// One maintenance cycle: retry queued events, flush closed minutes and
    /// sweep offline lines.
    pub fn run_maintenance(&self, now: i64) -> MaintenanceReport {
        let events_retried = self.retry_pending();

        let mut minutes_flushed = 0;
        let mut failed = Vec::new();
        for minute in self.engine.flush(now) {
            match self
                .store
                .upsert_minute(&minute.line_id, minute.minute, minute.average())
            {
                Ok(()) => minutes_flushed += 1,
                Err(e) => {
                    self.stats.record_store_failure();
                    tracing::warn!(
                        line_id = %minute.line_id,
                        minute = minute.minute,
                        error = %e,
                        "failed to store minute average"
                    );
                    failed.push(minute);
                }
            }
        }
        let minutes_requeued = failed.len();
        if !failed.is_empty() {
            self.engine.requeue(failed);
        }
        self.stats.record_minutes_flushed(minutes_flushed as u64);

        let forced = self.engine.sweep(now);
        for line_id in &forced {
            tracing::info!(line_id = %line_id, "line offline, forced to stopped");
            let event = StatusEvent::new(line_id.clone(), now, LineState::Stopped)
                .with_product(self.product(line_id));
            self.log_status(event);
        }
        self.stats.record_offline_stops(forced.len() as u64);

        let report = MaintenanceReport {
            events_retried,
            events_pending: self.pending_events(),
            minutes_flushed,
            minutes_requeued,
            forced_offline: forced.into_iter().collect(),
        };
        tracing::debug!(
            events_retried = report.events_retried,
            events_pending = report.events_pending,
            minutes_flushed = report.minutes_flushed,
            minutes_requeued = report.minutes_requeued,
            forced_offline = report.forced_offline.len(),
            "maintenance cycle"
        );
        report
    }

    /// Status of every enabled line.
    pub fn line_statuses(&self, now: i64) -> Vec<LineStatus> {
        let config = self.config();
        let timeout = signed_secs(self.settings().offline_timeout_secs);

        config
            .lines
            .iter()
            .filter(|l| l.enabled)
            .map(|line| {
                let snapshot = self.engine.snapshot(&line.id);
                let last_packet = snapshot.as_ref().and_then(|s| s.last_packet);
                let state = snapshot.as_ref().map_or(LineState::Stopped, |s| s.state);
                let online = last_packet.is_some_and(|t| now.saturating_sub(t) <= timeout);

                let state_label = match (online, state) {
                    (false, _) => StatusLabel::NoData,
                    (true, LineState::Running) => StatusLabel::Running,
                    (true, LineState::Stopped) => StatusLabel::Stopped,
                };

                LineStatus {
                    line_id: line.id.clone(),
                    display_name: config.display_name(&line.id),
                    speed: snapshot.as_ref().map_or(0.0, |s| s.smoothed_speed),
                    is_running: state.is_running(),
                    last_packet_time: last_packet,
                    state_label,
                    product: config.product(&line.id).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Minute averages over the last `hours`, gaps as `None`.
    pub fn series(&self, line_id: &str, hours: u32, now: i64) -> Result<Series, MonitorError> {
        let to_minute = minute_floor(now);
        let from_minute = to_minute - hours as i64 * 3600;
        let averages = self.store.minute_averages(line_id, from_minute, to_minute)?;
        Ok(Series::from_minutes(&averages, from_minute, to_minute))
    }

    /// Reconstruct `days` of one line from the status log.
    pub fn reconstruct(
        &self,
        line_id: &str,
        days: &[DayWindow],
        track_products: bool,
    ) -> Result<Reconstruction, MonitorError> {
        let (Some(first), Some(last)) = (days.first(), days.last()) else {
            return Ok(Reconstruction::default());
        };

        let prior = self.store.last_status_before(line_id, first.start)?;
        let events = self
            .store
            .status_events(line_id, first.start, last.end.saturating_sub(1))?;

        let initial_state = prior.as_ref().map_or(LineState::Stopped, |e| e.state);
        let initial_product = prior
            .and_then(|e| e.product)
            .or_else(|| self.product(line_id));

        let options = ReconstructOptions {
            min_segment_secs: signed_secs(self.settings().min_segment_secs),
            track_products,
        };
        Ok(SegmentReconstructor::new(options).reconstruct(
            &events,
            initial_state,
            initial_product.as_deref(),
            days,
        ))
    }

    /// Daily work/idle hours for the trailing `days` UTC days, oldest first.
    ///
    /// Today ends at `now`; time that has not happened yet is not counted.
    pub fn daily_work_idle(
        &self,
        line_id: &str,
        days: u32,
        now: i64,
    ) -> Result<DailyWorkIdle, MonitorError> {
        check_days(days)?;
        let windows = trailing_until(now, days);
        let reconstruction = self.reconstruct(line_id, &windows, false)?;
        Ok(DailyWorkIdle::from_reconstruction(&reconstruction))
    }

    /// Speed series and daily work/idle for the dashboard chart of a line.
    pub fn chart_data(&self, line_id: &str, now: i64) -> Result<ChartData, MonitorError> {
        let (graph_hours, report_days, line_name) = {
            let config = self.config_read();
            (
                config.graph_hours,
                config.report_days,
                config.display_name(line_id),
            )
        };

        Ok(ChartData {
            speed: self.series(line_id, graph_hours, now)?,
            status: StatusChart {
                daily: self.daily_work_idle(line_id, report_days, now)?,
                line_name,
            },
        })
    }

    /// Detailed run/idle report with products for every enabled line over
    /// `[from, to)`.
    pub fn report(&self, from: i64, to: i64) -> Result<Report, MonitorError> {
        if from >= to {
            return Err(MonitorError::InvalidInput(
                "from must be before to".to_string(),
            ));
        }
        if to.saturating_sub(from) > MAX_REPORT_DAYS as i64 * SECONDS_PER_DAY {
            return Err(MonitorError::InvalidInput(format!(
                "report range exceeds {MAX_REPORT_DAYS} days"
            )));
        }
        let days = DayWindow::span(from, to);
        let config = self.config();

        let mut lines = Vec::new();
        for line in config.lines.iter().filter(|l| l.enabled) {
            let reconstruction = self.reconstruct(&line.id, &days, true)?;
            lines.push(LineReport::new(
                &line.id,
                config.display_name(&line.id),
                &reconstruction,
            ));
        }

        Ok(Report {
            from: rfc3339_label(from),
            to: rfc3339_label(to),
            lines,
        })
    }

    /// Clean daily work/idle table for every enabled line.
    pub fn daily_report(&self, days: u32, now: i64) -> Result<DailyReport, MonitorError> {
        check_days(days)?;
        let config = self.config();

        let mut lines = Vec::new();
        for line in config.lines.iter().filter(|l| l.enabled) {
            let daily = self.daily_work_idle(&line.id, days, now)?;
            lines.push(DailyLineReport {
                line_id: line.id.clone(),
                display_name: config.display_name(&line.id),
                summary: daily.summary(),
                daily,
            });
        }

        Ok(DailyReport { days, lines })
    }

    /// Apply a settings patch, swap the detection snapshot and persist.
    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<Config, MonitorError> {
        let updated = {
            let mut config = self.config_write();
            config.apply_patch(patch);
            config.clone()
        };
        self.engine.settings().replace(updated.detection.clone());

        // Command-line overrides (port, database) must not reach the file
        if let Some(ref path) = self.config_path {
            let mut on_disk = Config::load_from(path)?;
            on_disk.apply_patch(patch);
            on_disk.save_to(path)?;
        }
        tracing::info!(
            window_secs = updated.detection.window_secs,
            v_start = updated.detection.v_start,
            v_stop = updated.detection.v_stop,
            "settings updated"
        );
        Ok(updated)
    }

    /// Re-read the config file and swap in changed detection settings,
    /// line profiles and chart windows.
    ///
    /// Returns true when something changed. A missing file leaves the
    /// current configuration in place; port and paths are never reloaded.
    pub fn reload_config(&self) -> Result<bool, MonitorError> {
        let Some(ref path) = self.config_path else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let loaded = Config::load_from(path)?;
        let mut config = self.config_write();
        let next = Config {
            detection: loaded.detection,
            lines: loaded.lines,
            graph_hours: loaded.graph_hours,
            report_days: loaded.report_days,
            ..config.clone()
        };
        if *config == next {
            return Ok(false);
        }

        self.engine.settings().replace(next.detection.clone());
        *config = next;
        tracing::info!(path = %path.display(), "configuration reloaded");
        Ok(true)
    }
}

fn validate(input: &PacketInput, now: i64) -> Result<TelemetryPacket, MonitorError> {
    if input.line_id.trim().is_empty() {
        return Err(MonitorError::InvalidInput("lineId is required".to_string()));
    }
    if input.duration_ms <= 0 {
        return Err(MonitorError::InvalidInput(
            "duration must be positive".to_string(),
        ));
    }
    if input.pulses < 0 {
        return Err(MonitorError::InvalidInput(
            "pulses must not be negative".to_string(),
        ));
    }

    Ok(TelemetryPacket::new(
        input.pulses as u64,
        input.duration_ms as u64,
        normalize_timestamp(input.timestamp, now),
    ))
}

fn check_days(days: u32) -> Result<(), MonitorError> {
    if days > MAX_REPORT_DAYS {
        return Err(MonitorError::InvalidInput(format!(
            "days must be at most {MAX_REPORT_DAYS}"
        )));
    }
    Ok(())
}

/// Trailing UTC days with the current one clamped to `now`.
fn trailing_until(now: i64, days: u32) -> Vec<DayWindow> {
    let mut windows = DayWindow::trailing(now, days);
    if let Some(today) = windows.last_mut() {
        today.end = today.end.min(now.max(today.start));
    }
    windows
}
