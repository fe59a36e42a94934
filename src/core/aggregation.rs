//! Per-minute aggregation of smoothed speed for charting.
//!
//! Every smoothed sample lands in the bucket of its minute. Buckets are
//! handed out by [`MinuteAggregator::flush`] once wall-clock time has moved
//! past their minute, and removed at the same time, so repeated flushes
//! never emit the same minute twice.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Start of the minute containing `ts`.
pub fn minute_floor(ts: i64) -> i64 {
    ts.div_euclid(60) * 60
}

/// Running sum of the samples seen in one minute.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MinuteBucket {
    sum: f64,
    count: u64,
}

/// A minute whose samples are final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedMinute {
    pub line_id: String,
    /// Start of the minute, epoch seconds
    pub minute: i64,
    pub sum: f64,
    pub count: u64,
}

impl ClosedMinute {
    /// Mean smoothed speed over the minute.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Open minute buckets keyed by `(line_id, minute)`.
#[derive(Debug, Clone, Default)]
pub struct MinuteAggregator {
    buckets: BTreeMap<(String, i64), MinuteBucket>,
}

impl MinuteAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one smoothed sample.
    pub fn record(&mut self, line_id: &str, timestamp: i64, speed: f64) {
        let bucket = self
            .buckets
            .entry((line_id.to_string(), minute_floor(timestamp)))
            .or_default();
        bucket.sum += speed;
        bucket.count += 1;
    }

    /// Remove and return every bucket strictly before the minute of `now`.
    ///
    /// Buckets without samples cannot be built through [`record`](Self::record);
    /// any that turn up are logged and dropped.
    pub fn flush(&mut self, now: i64) -> Vec<ClosedMinute> {
        let current = minute_floor(now);
        let matured: Vec<(String, i64)> = self
            .buckets
            .keys()
            .filter(|(_, minute)| *minute < current)
            .cloned()
            .collect();

        let mut closed = Vec::with_capacity(matured.len());
        for key in matured {
            let Some(bucket) = self.buckets.remove(&key) else {
                continue;
            };
            let (line_id, minute) = key;
            if bucket.count == 0 {
                tracing::warn!(line_id = %line_id, minute, "dropping minute bucket without samples");
                continue;
            }
            closed.push(ClosedMinute {
                line_id,
                minute,
                sum: bucket.sum,
                count: bucket.count,
            });
        }
        closed
    }

    /// Put a flushed minute back, e.g. after the store rejected it.
    ///
    /// Samples recorded for the same minute in the meantime are merged.
    pub fn requeue(&mut self, minute: ClosedMinute) {
        let bucket = self
            .buckets
            .entry((minute.line_id, minute.minute))
            .or_default();
        bucket.sum += minute.sum;
        bucket.count += minute.count;
    }

    /// Number of open buckets.
    pub fn pending(&self) -> usize {
        self.buckets.len()
    }
}
