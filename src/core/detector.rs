//! Hysteresis run/stop detection.
//!
//! Two thresholds and two independent delays: a stopped line must stay at or
//! above `v_start` for `delay_start` continuous seconds to be declared
//! running, and a running line must stay at or below `v_stop` for
//! `delay_stop` continuous seconds to be declared stopped. A hold timer
//! resets as soon as its condition breaks; satisfied time never accumulates
//! across gaps.

use crate::config::{signed_secs, DetectionSettings};
use crate::telemetry::LineState;

/// Result of evaluating one smoothed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: LineState,
    pub changed: bool,
}

/// Per-line hysteresis state machine.
#[derive(Debug, Clone, Default)]
pub struct HysteresisDetector {
    state: LineState,
    hold_start: Option<i64>,
    hold_stop: Option<i64>,
}

impl HysteresisDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    /// When the current start condition began holding, if it holds.
    pub fn hold_start(&self) -> Option<i64> {
        self.hold_start
    }

    /// When the current stop condition began holding, if it holds.
    pub fn hold_stop(&self) -> Option<i64> {
        self.hold_stop
    }

    /// Feed one smoothed speed sample taken at `now`.
    pub fn evaluate(&mut self, speed: f64, now: i64, settings: &DetectionSettings) -> Transition {
        let previous = self.state;

        match self.state {
            LineState::Stopped => {
                if speed >= settings.v_start {
                    let since = *self.hold_start.get_or_insert(now);
                    if now.saturating_sub(since) >= signed_secs(settings.delay_start_secs) {
                        self.state = LineState::Running;
                        self.clear_holds();
                    }
                } else {
                    self.hold_start = None;
                }
            }
            LineState::Running => {
                if speed <= settings.v_stop {
                    let since = *self.hold_stop.get_or_insert(now);
                    if now.saturating_sub(since) >= signed_secs(settings.delay_stop_secs) {
                        self.state = LineState::Stopped;
                        self.clear_holds();
                    }
                } else {
                    self.hold_stop = None;
                }
            }
        }

        Transition {
            state: self.state,
            changed: self.state != previous,
        }
    }

    /// Force the line to stopped without a hold period.
    ///
    /// Returns true when the line was running.
    pub fn force_stop(&mut self) -> bool {
        self.clear_holds();
        let was_running = self.state.is_running();
        self.state = LineState::Stopped;
        was_running
    }

    pub fn clear_holds(&mut self) {
        self.hold_start = None;
        self.hold_stop = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DetectionSettings {
        DetectionSettings {
            v_start: 0.5,
            v_stop: 0.3,
            delay_start_secs: 30,
            delay_stop_secs: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_starts_only_after_continuous_delay() {
        let s = settings();
        let mut detector = HysteresisDetector::new();

        for ts in 0..30 {
            let t = detector.evaluate(0.6, ts, &s);
            assert_eq!(t.state, LineState::Stopped, "ts={ts}");
            assert!(!t.changed);
        }
        assert_eq!(detector.hold_start(), Some(0));

        let t = detector.evaluate(0.6, 30, &s);
        assert!(t.changed);
        assert_eq!(t.state, LineState::Running);
        assert_eq!(detector.hold_start(), None);
        assert_eq!(detector.hold_stop(), None);

        // Reported once per crossing
        let t = detector.evaluate(0.6, 31, &s);
        assert!(!t.changed);
    }

    #[test]
    fn test_dip_resets_start_timer() {
        let s = settings();
        let mut detector = HysteresisDetector::new();

        detector.evaluate(0.6, 0, &s);
        detector.evaluate(0.6, 20, &s);
        detector.evaluate(0.4, 21, &s);
        assert_eq!(detector.hold_start(), None);

        detector.evaluate(0.6, 22, &s);
        assert_eq!(detector.hold_start(), Some(22));

        let t = detector.evaluate(0.6, 40, &s);
        assert!(!t.changed, "time before the dip must not count");

        let t = detector.evaluate(0.6, 52, &s);
        assert!(t.changed);
    }

    #[test]
    fn test_stop_uses_its_own_threshold_and_delay() {
        let s = DetectionSettings {
            delay_stop_secs: 60,
            ..settings()
        };
        let mut detector = HysteresisDetector::new();
        detector.evaluate(1.0, 0, &s);
        detector.evaluate(1.0, 30, &s);
        assert_eq!(detector.state(), LineState::Running);

        // Between the thresholds: neither timer runs
        detector.evaluate(0.4, 40, &s);
        assert_eq!(detector.hold_stop(), None);

        detector.evaluate(0.3, 50, &s);
        assert_eq!(detector.hold_stop(), Some(50));
        assert!(!detector.evaluate(0.0, 100, &s).changed);

        let t = detector.evaluate(0.0, 110, &s);
        assert!(t.changed);
        assert_eq!(t.state, LineState::Stopped);
    }

    #[test]
    fn test_zero_delay_switches_immediately() {
        let s = DetectionSettings {
            delay_start_secs: 0,
            ..settings()
        };
        let mut detector = HysteresisDetector::new();
        assert!(detector.evaluate(0.5, 10, &s).changed);
    }

    #[test]
    fn test_force_stop_reports_only_running_lines() {
        let s = settings();
        let mut detector = HysteresisDetector::new();
        assert!(!detector.force_stop());

        detector.evaluate(1.0, 0, &s);
        detector.evaluate(1.0, 30, &s);
        detector.evaluate(0.0, 40, &s);
        assert!(detector.hold_stop().is_some());

        assert!(detector.force_stop());
        assert_eq!(detector.state(), LineState::Stopped);
        assert_eq!(detector.hold_stop(), None);
    }

    #[test]
    fn test_out_of_order_sample_does_not_trigger() {
        let s = settings();
        let mut detector = HysteresisDetector::new();
        detector.evaluate(0.6, 100, &s);
        let t = detector.evaluate(0.6, 50, &s);
        assert!(!t.changed);
    }
}
