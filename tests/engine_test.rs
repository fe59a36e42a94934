//! Integration tests for the per-line estimation engine

use line_monitor::config::{SettingsHandle, SettingsPatch};
use line_monitor::core::Engine;
use line_monitor::telemetry::{LineState, TelemetryPacket};
use std::sync::Arc;
use std::thread;

/// Feed `pulses` per one-second packet every 5 seconds over `[from, to]` and
/// return the timestamps where the state changed.
fn feed(engine: &Engine, line_id: &str, pulses: u64, from: i64, to: i64) -> Vec<(i64, LineState)> {
    let mut changes = Vec::new();
    let mut ts = from;
    while ts <= to {
        let outcome = engine.ingest_packet(line_id, TelemetryPacket::new(pulses, 1_000, ts));
        if outcome.state_changed {
            changes.push((ts, outcome.state));
        }
        ts += 5;
    }
    changes
}

#[test]
fn test_full_run_stop_cycle() {
    let engine = Engine::with_defaults();

    // 10 pulses per second is 600 per minute, far above V_START
    let started = feed(&engine, "line1", 10, 0, 60);
    assert_eq!(started, vec![(30, LineState::Running)]);
    assert!((engine.smoothed_speed("line1") - 600.0).abs() < 1e-9);

    // The old packets leave the 60 s window at 125, then the stop delay runs
    let stopped = feed(&engine, "line1", 0, 65, 200);
    assert_eq!(stopped, vec![(155, LineState::Stopped)]);
    assert_eq!(engine.smoothed_speed("line1"), 0.0);
}

#[test]
fn test_short_dip_does_not_stop_line() {
    let engine = Engine::with_defaults();
    feed(&engine, "line1", 10, 0, 60);

    // Twenty seconds without pulses still averages above V_STOP
    assert!(feed(&engine, "line1", 0, 65, 85).is_empty());
    assert!(feed(&engine, "line1", 10, 90, 300).is_empty());
    assert_eq!(engine.state("line1"), LineState::Running);
}

#[test]
fn test_millisecond_timestamps_are_normalized() {
    let engine = Engine::with_defaults();
    let outcome = engine.ingest("line1", 5, 1_000, Some(1_700_000_000_123));
    assert_eq!(outcome.timestamp, 1_700_000_000);

    let outcome = engine.ingest("line1", 5, 1_000, Some(1_700_000_005));
    assert_eq!(outcome.timestamp, 1_700_000_005);
    assert_eq!(engine.snapshot("line1").unwrap().window_len, 2);
}

#[test]
fn test_minutes_flush_once() {
    let engine = Engine::with_defaults();
    feed(&engine, "line1", 10, 0, 55);
    feed(&engine, "line1", 10, 60, 70);

    let closed = engine.flush(75);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].minute, 0);
    assert_eq!(closed[0].count, 12);
    assert!((closed[0].average() - 600.0).abs() < 1e-9);

    assert!(engine.flush(75).is_empty());
    assert_eq!(engine.pending_minutes(), 1);
}

#[test]
fn test_requeued_minutes_merge_with_new_samples() {
    let engine = Engine::with_defaults();
    feed(&engine, "line1", 10, 0, 10);
    let closed = engine.flush(60);
    assert_eq!(closed[0].count, 3);

    engine.requeue(closed);
    let again = engine.flush(60);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].count, 3);
}

#[test]
fn test_sweep_only_reports_running_lines() {
    let engine = Engine::with_defaults();
    feed(&engine, "running", 10, 0, 30);
    feed(&engine, "idle", 0, 0, 30);

    assert!(engine.sweep(90).is_empty());
    let forced = engine.sweep(91);
    assert_eq!(forced.into_iter().collect::<Vec<_>>(), vec!["running".to_string()]);

    assert_eq!(engine.state("running"), LineState::Stopped);
    let snapshot = engine.snapshot("running").unwrap();
    assert_eq!(snapshot.window_len, 0);
    assert_eq!(snapshot.smoothed_speed, 0.0);
    assert_eq!(snapshot.last_packet, Some(30));

    // A second sweep has nothing left to stop
    assert!(engine.sweep(200).is_empty());
}

#[test]
fn test_settings_swap_applies_to_next_packet() {
    let settings = Arc::new(SettingsHandle::default());
    let engine = Engine::new(settings.clone());

    settings.update(&SettingsPatch {
        v_start: Some(serde_json::json!(1_000)),
        ..Default::default()
    });
    assert!(feed(&engine, "line1", 10, 0, 60).is_empty());

    settings.update(&SettingsPatch {
        v_start: Some(serde_json::json!(100)),
        delay_start: Some(serde_json::json!(0)),
        ..Default::default()
    });
    assert_eq!(feed(&engine, "line1", 10, 65, 65), vec![(65, LineState::Running)]);
}

#[test]
fn test_concurrent_ingest_on_many_lines() {
    let engine = Arc::new(Engine::with_defaults());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let line_id = format!("line{i}");
                feed(&engine, &line_id, 10, 0, 95)
            })
        })
        .collect();

    for handle in handles {
        let changes = handle.join().unwrap();
        assert_eq!(changes, vec![(30, LineState::Running)]);
    }
    assert_eq!(engine.line_ids(), vec!["line0", "line1", "line2", "line3"]);
}
