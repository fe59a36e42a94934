//! Chart and report views built from stored minutes and reconstructions.
//!
//! Everything here is a plain data transformation; the monitor fetches the
//! inputs from the store and hands them over.

use crate::core::{hours, DaySegments, Reconstruction, SECONDS_PER_DAY};
use crate::telemetry::LineState;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Longest period, in days, a single chart or report may cover.
pub const MAX_REPORT_DAYS: u32 = 366;

/// `YYYY-MM-DDTHH:MM:SSZ` for an epoch timestamp.
pub fn rfc3339_label(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

/// `YYYY-MM-DD HH:MM:SS` for an epoch timestamp.
pub fn clock_label(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Minute-resolution speed series; `None` marks minutes without data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub labels: Vec<String>,
    pub data: Vec<Option<f64>>,
}

impl Series {
    /// Lay `averages` onto every minute of `[from_minute, to_minute]`.
    pub fn from_minutes(averages: &[(i64, f64)], from_minute: i64, to_minute: i64) -> Self {
        let by_minute: HashMap<i64, f64> = averages.iter().copied().collect();
        let mut series = Series::default();

        let mut t = from_minute;
        while t <= to_minute {
            series.labels.push(rfc3339_label(t));
            series.data.push(by_minute.get(&t).copied());
            t += 60;
        }
        series
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Work and idle hours per day, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyWorkIdle {
    pub labels: Vec<String>,
    pub work: Vec<f64>,
    #[serde(rename = "down")]
    pub idle: Vec<f64>,
}

impl DailyWorkIdle {
    pub fn from_reconstruction(reconstruction: &Reconstruction) -> Self {
        let mut daily = Self::default();
        for day in &reconstruction.days {
            daily.labels.push(day.label.clone());
            daily.work.push(day.work_hours());
            daily.idle.push(day.idle_hours());
        }
        daily
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary::from_hours(self.work.iter().sum(), self.idle.iter().sum())
    }
}

/// Payload of the per-line chart endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub speed: Series,
    pub status: StatusChart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChart {
    #[serde(flatten)]
    pub daily: DailyWorkIdle,
    pub line_name: String,
}

/// Work/idle totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub work_hours: f64,
    pub idle_hours: f64,
    /// Idle share in percent, one decimal
    pub idle_pct: f64,
}

impl ReportSummary {
    pub fn from_secs(work_secs: i64, idle_secs: i64) -> Self {
        let total = work_secs + idle_secs;
        let idle_pct = if total > 0 {
            (idle_secs as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            work_hours: hours(work_secs),
            idle_hours: hours(idle_secs),
            idle_pct,
        }
    }

    pub fn from_hours(work_hours: f64, idle_hours: f64) -> Self {
        let total = work_hours + idle_hours;
        let idle_pct = if total > 0.0 {
            (idle_hours / total * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            work_hours: (work_hours * 10.0).round() / 10.0,
            idle_hours: (idle_hours * 10.0).round() / 10.0,
            idle_pct,
        }
    }
}

/// Kind of row in a detailed line report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportEvent {
    /// A work segment; carries its duration
    Run,
    /// End of a work segment
    Stop,
    /// An idle segment; carries its duration
    Idle,
    /// End of an idle segment followed by work
    Start,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub date: String,
    pub event: ReportEvent,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<i64>,
    pub product: String,
}

fn duration_minutes(secs: i64) -> i64 {
    (secs as f64 / 60.0).round() as i64
}

/// Rows for one reconstructed day.
pub fn day_rows(day: &DaySegments) -> Vec<ReportRow> {
    let mut rows = Vec::with_capacity(day.segments.len() * 2);
    for (i, seg) in day.segments.iter().enumerate() {
        let product = seg.product.clone().unwrap_or_default();
        let row = |event, ts, duration_min| ReportRow {
            date: day.label.clone(),
            event,
            time: clock_label(ts),
            duration_min,
            product: product.clone(),
        };

        match seg.state {
            LineState::Running => {
                rows.push(row(ReportEvent::Run, seg.start, Some(duration_minutes(seg.duration()))));
                rows.push(row(ReportEvent::Stop, seg.end, None));
            }
            LineState::Stopped => {
                rows.push(row(ReportEvent::Idle, seg.start, Some(duration_minutes(seg.duration()))));
                let next_runs = day
                    .segments
                    .get(i + 1)
                    .is_some_and(|next| next.state.is_running());
                if next_runs {
                    rows.push(row(ReportEvent::Start, seg.end, None));
                }
            }
        }
    }
    rows
}

/// Detailed report of one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReport {
    pub line_id: String,
    pub display_name: String,
    pub rows: Vec<ReportRow>,
    pub summary: ReportSummary,
}

impl LineReport {
    pub fn new(line_id: &str, display_name: String, reconstruction: &Reconstruction) -> Self {
        let rows = reconstruction.days.iter().flat_map(day_rows).collect();
        Self {
            line_id: line_id.to_string(),
            display_name,
            rows,
            summary: ReportSummary::from_secs(
                reconstruction.total_work_secs(),
                reconstruction.total_idle_secs(),
            ),
        }
    }
}

/// Detailed report over `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub from: String,
    pub to: String,
    pub lines: Vec<LineReport>,
}

/// Clean daily table of one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLineReport {
    pub line_id: String,
    pub display_name: String,
    pub daily: DailyWorkIdle,
    pub summary: ReportSummary,
}

/// Daily work/idle report for every enabled line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub days: u32,
    pub lines: Vec<DailyLineReport>,
}

/// Parse a report bound: RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC) or
/// `YYYY-MM-DD` (UTC midnight).
pub fn parse_report_time(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// Resolve optional report bounds; defaults to the `default_days` before `now`.
pub fn report_range(
    from: Option<&str>,
    to: Option<&str>,
    now: i64,
    default_days: u32,
) -> (i64, i64) {
    let to_ts = to.and_then(parse_report_time).unwrap_or(now);
    let from_ts = from
        .and_then(parse_report_time)
        .unwrap_or(to_ts - default_days as i64 * SECONDS_PER_DAY);
    (from_ts, to_ts)
}
