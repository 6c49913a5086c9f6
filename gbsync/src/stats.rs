//! Counters and read-only state snapshots for debugging and telemetry.
use crate::spike::{LagSpikeCause, SpikeState};

/// Cumulative counters for one [`crate::SnapshotSync`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncStats {
    pub snapshots_received: u64,
    pub snapshots_accepted: u64,
    pub duplicates_dropped: u64,
    pub out_of_order_dropped: u64,
    /// Snapshots with a non-finite server or arrival time.
    pub malformed_dropped: u64,
    pub sequence_gaps: u64,
    /// Sequences skipped over by gaps.
    pub snapshots_missing: u64,
    pub implausible_intervals: u64,
    pub arrival_impairments: u64,
    pub spikes_entered: u64,
    pub samples_served: u64,
    pub samples_extrapolated: u64,
}

impl SyncStats {
    /// Fraction of received snapshots that were dropped as duplicates, out
    /// of order, or malformed.
    pub fn drop_ratio(&self) -> f32 {
        if self.snapshots_received == 0 {
            return 0.0;
        }
        (self.duplicates_dropped + self.out_of_order_dropped + self.malformed_dropped) as f32
            / self.snapshots_received as f32
    }

    /// Fraction of expected snapshots that never arrived.
    pub fn loss_ratio(&self) -> f32 {
        let expected = self.snapshots_accepted + self.snapshots_missing;
        if expected == 0 {
            return 0.0;
        }
        self.snapshots_missing as f32 / expected as f32
    }
}

/// Point-in-time copy of the sync state. Handed to hosts and event sinks
/// by value, so nothing outside the core can mutate live state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncDebugState {
    pub now_ms: f64,
    pub clock_offset_ms: f64,
    pub tick_ms: f64,
    pub interval_ms: f64,
    pub jitter_ms: f64,
    pub jitter_delay_ms: f64,
    pub stale_ms: f64,
    pub latest_seq: Option<u64>,
    pub seq_gap_detected: bool,
    pub last_seq_gap: u64,
    pub spike: SpikeState,
    pub arrival_impaired_until: Option<f64>,
    pub arrival_gap_cooldown_until: Option<f64>,
    pub delay_boost_ms: f64,
    pub playout_delay_ms: f64,
    pub target_delay_ms: f64,
    pub render_time: Option<f64>,
    pub buffered: usize,
    pub tuning_revision: u64,
}

impl SyncDebugState {
    pub fn spike_active(&self) -> bool {
        self.spike.is_active()
    }

    pub fn spike_cause(&self) -> LagSpikeCause {
        self.spike.cause()
    }
}
