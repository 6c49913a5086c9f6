//! Sequence continuity: duplicate and out-of-order rejection plus a sticky
//! sequence-gap condition that clears after a gap-free recovery window.
use crate::util::{sequence_diff, sequence_greater_than};

/// Outcome of checking an incoming snapshot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceVerdict {
    /// Accepted. `gap` is the distance from the previous latest sequence
    /// (1 when contiguous, 0 for the first snapshot).
    Accepted { gap: u64 },
    Duplicate,
    OutOfOrder { latest: u64 },
    /// Dropped before sequencing because a timestamp was not finite.
    Malformed,
}

impl SequenceVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SequenceVerdict::Accepted { .. })
    }
}

/// Tracks the newest accepted sequence and the seq-gap condition.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    latest: Option<u64>,
    gap_detected: bool,
    gap_at_ms: f64,
    last_gap: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `seq` and, if accepted, advance the latest sequence.
    pub fn observe(&mut self, seq: u64, now_ms: f64, recovery_ms: f64) -> SequenceVerdict {
        self.refresh(now_ms, recovery_ms);

        let Some(latest) = self.latest else {
            self.latest = Some(seq);
            return SequenceVerdict::Accepted { gap: 0 };
        };

        if seq == latest {
            return SequenceVerdict::Duplicate;
        }
        if !sequence_greater_than(seq, latest) {
            return SequenceVerdict::OutOfOrder { latest };
        }

        let gap = sequence_diff(seq, latest) as u64;
        if gap > 1 {
            self.gap_detected = true;
            self.gap_at_ms = now_ms;
            self.last_gap = gap;
        }
        self.latest = Some(seq);
        SequenceVerdict::Accepted { gap }
    }

    /// Clear the gap condition once `recovery_ms` has passed without another gap.
    pub fn refresh(&mut self, now_ms: f64, recovery_ms: f64) {
        if self.gap_detected && now_ms - self.gap_at_ms >= recovery_ms {
            self.gap_detected = false;
        }
    }

    pub fn latest(&self) -> Option<u64> {
        self.latest
    }

    pub fn gap_detected(&self) -> bool {
        self.gap_detected
    }

    /// Size of the most recent gap, as the distance between sequences.
    pub fn last_gap(&self) -> u64 {
        self.last_gap
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECOVERY: f64 = 250.0;

    #[test]
    fn test_contiguous_sequences() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(
            tracker.observe(1, 0.0, RECOVERY),
            SequenceVerdict::Accepted { gap: 0 }
        );
        assert_eq!(
            tracker.observe(2, 33.0, RECOVERY),
            SequenceVerdict::Accepted { gap: 1 }
        );
        assert!(!tracker.gap_detected());
        assert_eq!(tracker.latest(), Some(2));
    }

    #[test]
    fn test_duplicate_and_out_of_order_rejected() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(10, 0.0, RECOVERY);
        assert_eq!(tracker.observe(10, 1.0, RECOVERY), SequenceVerdict::Duplicate);
        assert_eq!(
            tracker.observe(9, 2.0, RECOVERY),
            SequenceVerdict::OutOfOrder { latest: 10 }
        );
        assert_eq!(tracker.latest(), Some(10));
    }

    #[test]
    fn test_gap_is_sticky_until_recovery() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(2, 0.0, RECOVERY);
        assert_eq!(
            tracker.observe(5, 100.0, RECOVERY),
            SequenceVerdict::Accepted { gap: 3 }
        );
        assert!(tracker.gap_detected());
        assert_eq!(tracker.last_gap(), 3);

        tracker.refresh(300.0, RECOVERY);
        assert!(tracker.gap_detected());
        tracker.refresh(350.0, RECOVERY);
        assert!(!tracker.gap_detected());
    }

    #[test]
    fn test_new_gap_restarts_recovery() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(1, 0.0, RECOVERY);
        tracker.observe(3, 0.0, RECOVERY);
        tracker.observe(6, 200.0, RECOVERY);
        tracker.refresh(300.0, RECOVERY);
        assert!(tracker.gap_detected());
        tracker.refresh(450.0, RECOVERY);
        assert!(!tracker.gap_detected());
    }

    #[test]
    fn test_gap_clears_on_ingestion_after_recovery() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(1, 0.0, RECOVERY);
        tracker.observe(4, 100.0, RECOVERY);
        assert!(tracker.gap_detected());

        assert_eq!(
            tracker.observe(5, 100.0 + RECOVERY, RECOVERY),
            SequenceVerdict::Accepted { gap: 1 }
        );
        assert!(!tracker.gap_detected());
        assert_eq!(tracker.last_gap(), 3);
    }

    #[test]
    fn test_wraparound_accepts_next() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(u64::MAX, 0.0, RECOVERY);
        assert_eq!(
            tracker.observe(0, 10.0, RECOVERY),
            SequenceVerdict::Accepted { gap: 1 }
        );
        assert!(!tracker.gap_detected());
    }
}
