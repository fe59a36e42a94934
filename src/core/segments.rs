//! Work/idle reconstruction from the status event log.
//!
//! The log only records transitions. To answer "how long did line N run on
//! day D" the reconstructor walks the transitions of each day, cuts the day
//! into contiguous state segments, and then folds away segments shorter than
//! the noise threshold: a 30 second "run" between two long stops is a
//! sensor blip, not production, so it is counted as idle and merged into its
//! neighbors.
//!
//! The same pass serves the daily chart (states only) and the detailed
//! report (states plus the product label that was on the line), selected by
//! [`ReconstructOptions::track_products`].
//!
//! Reconstruction is a pure function of its inputs: it never reads the
//! clock, and events are re-sorted by timestamp before use.

use crate::telemetry::LineState;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// One logged state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub line_id: String,
    /// Epoch seconds
    pub timestamp: i64,
    pub state: LineState,
    /// Product on the line when the transition was logged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl StatusEvent {
    pub fn new(line_id: impl Into<String>, timestamp: i64, state: LineState) -> Self {
        Self {
            line_id: line_id.into(),
            timestamp,
            state,
            product: None,
        }
    }

    pub fn with_product(mut self, product: Option<String>) -> Self {
        self.product = product.filter(|p| !p.is_empty());
        self
    }
}

/// Half-open interval `[start, end)` with a constant state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: i64,
    pub end: i64,
    pub state: LineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl Segment {
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// A reporting day (or the clamped tail of one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start: i64,
    pub end: i64,
}

impl DayWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The UTC day containing `ts`.
    pub fn containing(ts: i64) -> Self {
        let start = ts.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY;
        Self::new(start, start + SECONDS_PER_DAY)
    }

    /// The last `days` whole UTC days up to and including today, oldest first.
    pub fn trailing(now: i64, days: u32) -> Vec<Self> {
        let today = Self::containing(now);
        (0..days as i64)
            .rev()
            .map(|d| {
                let start = today.start - d * SECONDS_PER_DAY;
                Self::new(start, start + SECONDS_PER_DAY)
            })
            .collect()
    }

    /// UTC days covering `[from, to)`, the first aligned down to midnight and
    /// the last clamped to `to`.
    pub fn span(from: i64, to: i64) -> Vec<Self> {
        let mut days = Vec::new();
        if from >= to {
            return days;
        }
        let mut t = Self::containing(from).start;
        while t < to {
            days.push(Self::new(t, (t + SECONDS_PER_DAY).min(to)));
            t += SECONDS_PER_DAY;
        }
        days
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn len_secs(&self) -> i64 {
        self.end - self.start
    }

    /// `YYYY-MM-DD` of the day start (UTC).
    pub fn label(&self) -> String {
        day_label(self.start)
    }
}

/// `YYYY-MM-DD` for an epoch timestamp (UTC).
pub fn day_label(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Seconds to hours, rounded to one decimal.
pub fn hours(secs: i64) -> f64 {
    (secs as f64 / 360.0).round() / 10.0
}

/// Knobs for [`SegmentReconstructor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructOptions {
    /// Segments shorter than this are reinterpreted as the opposite state
    pub min_segment_secs: i64,
    /// Split segments on product label changes and carry labels through
    pub track_products: bool,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            min_segment_secs: 60,
            track_products: false,
        }
    }
}

/// Merged segments and totals for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySegments {
    pub label: String,
    pub window: DayWindow,
    pub segments: Vec<Segment>,
    pub work_secs: i64,
    pub idle_secs: i64,
}

impl DaySegments {
    pub fn work_hours(&self) -> f64 {
        hours(self.work_secs)
    }

    pub fn idle_hours(&self) -> f64 {
        hours(self.idle_secs)
    }
}

/// Reconstruction result over a sequence of days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    pub days: Vec<DaySegments>,
    /// State carried out of the last day
    pub final_state: LineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_product: Option<String>,
}

impl Reconstruction {
    pub fn total_work_secs(&self) -> i64 {
        self.days.iter().map(|d| d.work_secs).sum()
    }

    pub fn total_idle_secs(&self) -> i64 {
        self.days.iter().map(|d| d.idle_secs).sum()
    }

    /// Share of idle time in percent; zero when nothing was covered.
    pub fn idle_percentage(&self) -> f64 {
        let total = self.total_work_secs() + self.total_idle_secs();
        if total == 0 {
            0.0
        } else {
            self.total_idle_secs() as f64 / total as f64 * 100.0
        }
    }
}

/// Rebuilds per-day state segments from a transition log.
#[derive(Debug, Clone, Default)]
pub struct SegmentReconstructor {
    options: ReconstructOptions,
}

impl SegmentReconstructor {
    pub fn new(options: ReconstructOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ReconstructOptions {
        self.options
    }

    /// Reconstruct `days` (in the given order) from `events`.
    ///
    /// `initial_state`/`initial_product` describe the line just before the
    /// first day. Events outside every day window are ignored.
    pub fn reconstruct(
        &self,
        events: &[StatusEvent],
        initial_state: LineState,
        initial_product: Option<&str>,
        days: &[DayWindow],
    ) -> Reconstruction {
        let mut ordered: Vec<&StatusEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        let mut state = initial_state;
        let mut product = if self.options.track_products {
            initial_product.filter(|p| !p.is_empty()).map(str::to_string)
        } else {
            None
        };

        let mut result = Vec::with_capacity(days.len());
        for day in days {
            let lo = ordered.partition_point(|e| e.timestamp < day.start);
            let hi = ordered.partition_point(|e| e.timestamp < day.end).max(lo);

            let raw = self.split_day(day, &ordered[lo..hi], &mut state, &mut product);
            let segments = merge_short_segments(
                raw,
                self.options.min_segment_secs,
                self.options.track_products,
            );

            let mut work_secs = 0;
            let mut idle_secs = 0;
            for seg in &segments {
                match seg.state {
                    LineState::Running => work_secs += seg.duration(),
                    LineState::Stopped => idle_secs += seg.duration(),
                }
            }

            result.push(DaySegments {
                label: day.label(),
                window: *day,
                segments,
                work_secs,
                idle_secs,
            });
        }

        Reconstruction {
            days: result,
            final_state: state,
            final_product: product,
        }
    }

    /// Cut one day into raw segments, updating the carried state and label.
    fn split_day(
        &self,
        day: &DayWindow,
        events: &[&StatusEvent],
        state: &mut LineState,
        product: &mut Option<String>,
    ) -> Vec<Segment> {
        let track = self.options.track_products;
        let mut segments = Vec::with_capacity(events.len() + 1);
        let mut seg_start = day.start;

        for event in events {
            let label = event.product.as_ref().filter(|p| !p.is_empty());
            if event.state != *state {
                push_segment(&mut segments, seg_start, event.timestamp, *state, product);
                *state = event.state;
                seg_start = event.timestamp;
                if track {
                    if let Some(label) = label {
                        *product = Some(label.clone());
                    }
                }
            } else if track && label.is_some() && label != product.as_ref() {
                push_segment(&mut segments, seg_start, event.timestamp, *state, product);
                seg_start = event.timestamp;
                *product = label.cloned();
            }
        }
        push_segment(&mut segments, seg_start, day.end, *state, product);
        segments
    }
}

fn push_segment(
    segments: &mut Vec<Segment>,
    start: i64,
    end: i64,
    state: LineState,
    product: &Option<String>,
) {
    if end < start {
        tracing::warn!(start, end, "skipping segment with negative duration");
        return;
    }
    if end == start {
        return;
    }
    segments.push(Segment {
        start,
        end,
        state,
        product: product.clone(),
    });
}

/// Fold segments shorter than `min_secs` into their surroundings.
///
/// A short segment takes the opposite of its recorded state and extends the
/// previous segment when that one already has the resulting state; otherwise
/// it stands on its own with the flipped state. Long segments extend a
/// previous segment of the same state (and, with `track_products`, the same
/// label). The output tiles exactly the same interval as the input.
pub fn merge_short_segments(
    segments: Vec<Segment>,
    min_secs: i64,
    track_products: bool,
) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());

    for seg in segments {
        let short = seg.duration() < min_secs;
        let seg = if short {
            Segment {
                state: seg.state.flipped(),
                ..seg
            }
        } else {
            seg
        };

        match merged.last_mut() {
            Some(prev)
                if prev.state == seg.state
                    && (short || !track_products || prev.product == seg.product) =>
            {
                prev.end = seg.end;
            }
            _ => merged.push(seg),
        }
    }
    merged
}
