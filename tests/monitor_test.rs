//! End-to-end tests of the monitor over a SQLite status log

use line_monitor::config::{Config, SettingsPatch};
use line_monitor::core::{DayWindow, SECONDS_PER_DAY};
use line_monitor::report::ReportEvent;
use line_monitor::store::{SqliteStore, TelemetryStore};
use line_monitor::telemetry::LineState;
use line_monitor::{Monitor, PacketInput};
use std::path::Path;
use std::sync::Arc;

const DAY: i64 = 100 * SECONDS_PER_DAY;

fn open_monitor(db: &Path) -> Monitor {
    let store = SqliteStore::open(db).unwrap();
    Monitor::new(Config::default(), Arc::new(store))
}

/// One hour of steady production on `line1`, then silence until the
/// watchdog stops it.
fn run_one_hour(monitor: &Monitor) {
    let mut ts = DAY + 3_600;
    while ts <= DAY + 7_200 {
        monitor
            .handle_packet_at(&PacketInput::new("line1", 10, 1_000, Some(ts)), ts)
            .unwrap();
        ts += 5;
    }
    let report = monitor.run_maintenance(DAY + 7_261);
    assert_eq!(report.forced_offline, vec!["line1".to_string()]);
    assert_eq!(report.events_pending, 0);
}

#[test]
fn test_status_log_drives_reconstruction() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = open_monitor(&dir.path().join("data.db"));
    run_one_hour(&monitor);

    let events = monitor
        .store()
        .status_events("line1", DAY, DAY + SECONDS_PER_DAY)
        .unwrap();
    let logged: Vec<_> = events.iter().map(|e| (e.timestamp, e.state)).collect();
    assert_eq!(
        logged,
        vec![
            (DAY + 3_630, LineState::Running),
            (DAY + 7_261, LineState::Stopped)
        ]
    );

    let day = DayWindow::containing(DAY);
    let reconstruction = monitor.reconstruct("line1", &[day], false).unwrap();
    assert_eq!(reconstruction.days.len(), 1);
    assert_eq!(reconstruction.days[0].work_secs, 7_261 - 3_630);
    assert_eq!(
        reconstruction.days[0].idle_secs,
        SECONDS_PER_DAY - (7_261 - 3_630)
    );
    assert_eq!(reconstruction.final_state, LineState::Stopped);
}

#[test]
fn test_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data.db");
    let now = DAY + 12 * 3_600;

    let before = {
        let monitor = open_monitor(&db);
        run_one_hour(&monitor);
        monitor.daily_work_idle("line1", 3, now).unwrap()
    };

    let reopened = open_monitor(&db);
    let after = reopened.daily_work_idle("line1", 3, now).unwrap();
    assert_eq!(before, after);
    assert_eq!(after.labels.len(), 3);
    assert_eq!(after.work, vec![0.0, 0.0, 1.0]);
    assert_eq!(after.idle, vec![24.0, 24.0, 11.0]);
}

#[test]
fn test_minute_series_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = open_monitor(&dir.path().join("data.db"));
    run_one_hour(&monitor);

    let series = monitor.series("line1", 24, DAY + 43_200).unwrap();
    assert_eq!(series.len(), 24 * 60 + 1);

    let filled: Vec<f64> = series.data.iter().flatten().copied().collect();
    assert_eq!(filled.len(), 61);
    assert!(filled.iter().all(|v| (v - 600.0).abs() < 1e-9));
}

#[test]
fn test_report_carries_products() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = open_monitor(&dir.path().join("data.db"));
    monitor
        .update_settings(&SettingsPatch {
            products: Some([("line1".to_string(), "PE pipe 32mm".to_string())].into()),
            line_names: Some([("line1".to_string(), "Extruder A".to_string())].into()),
            ..Default::default()
        })
        .unwrap();
    run_one_hour(&monitor);

    let report = monitor.report(DAY, DAY + SECONDS_PER_DAY).unwrap();
    let line1 = report
        .lines
        .iter()
        .find(|l| l.line_id == "line1")
        .unwrap();
    assert_eq!(line1.display_name, "Extruder A");

    let run = line1
        .rows
        .iter()
        .find(|r| r.event == ReportEvent::Run)
        .unwrap();
    assert_eq!(run.product, "PE pipe 32mm");
    assert_eq!(run.duration_min, Some(61));
    assert_eq!(line1.summary.work_hours, 1.0);
}

#[test]
fn test_daily_report_lists_enabled_lines() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = open_monitor(&dir.path().join("data.db"));
    monitor
        .update_settings(&SettingsPatch {
            enabled_lines: Some(vec!["line1".to_string(), "line2".to_string()]),
            ..Default::default()
        })
        .unwrap();
    run_one_hour(&monitor);

    let report = monitor.daily_report(2, DAY + 12 * 3_600).unwrap();
    assert_eq!(report.days, 2);
    let ids: Vec<_> = report.lines.iter().map(|l| l.line_id.as_str()).collect();
    assert_eq!(ids, vec!["line1", "line2"]);
    assert_eq!(report.lines[0].summary.work_hours, 1.0);
    assert_eq!(report.lines[1].summary.work_hours, 0.0);
}
