//! Sliding time window over a line's recent packets.
//!
//! Packets older than the window (relative to the newest ingest) are pruned
//! on every push. The smoothed speed is a rate over the whole window, so a
//! line that reports in irregular bursts still yields a stable estimate.

use crate::config::signed_secs;
use crate::telemetry::TelemetryPacket;
use std::collections::VecDeque;

/// Recent packets for one line.
#[derive(Debug, Clone, Default)]
pub struct PacketWindow {
    packets: VecDeque<TelemetryPacket>,
}

impl PacketWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a packet and drop everything older than `window_secs` before `now`.
    ///
    /// Pruning filters by absolute age, so an out-of-order packet never
    /// causes newer packets to be discarded by mistake.
    pub fn push(&mut self, packet: TelemetryPacket, now: i64, window_secs: u64) {
        self.packets.push_back(packet);
        self.prune(now, window_secs);
    }

    /// Drop packets with `timestamp < now - window_secs`.
    pub fn prune(&mut self, now: i64, window_secs: u64) {
        let cutoff = now.saturating_sub(signed_secs(window_secs));
        self.packets.retain(|p| p.timestamp >= cutoff);
    }

    /// Pulses per minute over the retained window; zero for an empty window.
    pub fn speed(&self) -> f64 {
        let (pulses, duration_ms) = self
            .packets
            .iter()
            .fold((0u64, 0u64), |(p, d), pkt| {
                (p.saturating_add(pkt.pulses), d.saturating_add(pkt.duration_ms))
            });

        if duration_ms == 0 {
            return 0.0;
        }
        (pulses as f64 / (duration_ms as f64 / 1000.0)) * 60.0
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Oldest timestamp still in the window.
    pub fn oldest(&self) -> Option<i64> {
        self.packets.iter().map(|p| p.timestamp).min()
    }
}
