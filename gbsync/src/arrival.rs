//! Wall-clock arrival statistics: interval and jitter EWMAs, the capped jitter
//! delay used by playout, and arrival-gap impairment detection.
//!
//! A late arrival does not report a one-frame spike. It opens an impairment
//! window whose length scales with how late the packet was, and the spike
//! state machine reads that window.
use log::debug;

use crate::config::MAX_PLAUSIBLE_INTERVAL_MS;
use crate::tuning::Tuning;
use crate::util::ewma;

/// A detected late arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalImpairment {
    pub interval_ms: f64,
    pub lateness_ms: f64,
    /// Delay boost the playout controller should raise to, at least.
    pub boost_ms: f64,
    pub until_ms: f64,
}

/// Tracks local inter-arrival timing of accepted snapshots.
#[derive(Debug, Default)]
pub struct ArrivalStats {
    last_received_at: Option<f64>,
    interval_ms: Option<f64>,
    jitter_ms: f64,
    jitter_delay_ms: f64,
    impaired_until: Option<f64>,
    implausible_intervals: u64,
    impairments: u64,
}

impl ArrivalStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival at `now_ms`. Returns the impairment it opened, if any.
    pub fn observe(&mut self, now_ms: f64, tick_ms: f64, tuning: &Tuning) -> Option<ArrivalImpairment> {
        let last = self.last_received_at.replace(now_ms)?;
        let interval = now_ms - last;
        if interval <= 0.0 || interval > MAX_PLAUSIBLE_INTERVAL_MS {
            self.implausible_intervals += 1;
            debug!("Skipping implausible arrival interval {:.1}ms", interval);
            return None;
        }

        let impairment = self.detect_gap(interval, now_ms, tick_ms, tuning);

        match self.interval_ms {
            Some(mean) => {
                self.jitter_ms = ewma(self.jitter_ms, (interval - mean).abs(), tuning.jitter_smoothing);
                self.interval_ms = Some(ewma(mean, interval, tuning.interval_smoothing));
            }
            None => self.interval_ms = Some(interval),
        }
        let capped = self.jitter_ms.min(tick_ms * tuning.jitter_delay_cap_ticks);
        self.jitter_delay_ms = ewma(self.jitter_delay_ms, capped, tuning.jitter_delay_smoothing);

        impairment
    }

    fn detect_gap(
        &mut self,
        interval: f64,
        now_ms: f64,
        tick_ms: f64,
        tuning: &Tuning,
    ) -> Option<ArrivalImpairment> {
        let expected = self.interval_ms.unwrap_or(tick_ms);
        let threshold = (tick_ms * tuning.arrival_spike_interval_ticks).max(
            expected + self.jitter_ms * tuning.arrival_spike_jitter_multiplier
                + tuning.arrival_spike_margin_ms,
        );
        let lateness = interval - threshold;
        if lateness <= 0.0 || lateness <= tuning.arrival_spike_min_lateness_ms {
            return None;
        }

        let boost_ms =
            (lateness * tuning.arrival_boost_lateness_scale).min(tick_ms * tuning.arrival_boost_max_ticks);
        let hold_ms = (tuning.arrival_hold_base_ms + lateness * tuning.arrival_hold_lateness_scale)
            .min(tuning.arrival_hold_max_ms);
        let until_ms = self.impaired_until.map_or(now_ms + hold_ms, |u| u.max(now_ms + hold_ms));
        self.impaired_until = Some(until_ms);
        self.impairments += 1;
        debug!(
            "Arrival gap: interval {:.1}ms, late by {:.1}ms, impaired for {:.0}ms",
            interval, lateness, hold_ms
        );

        Some(ArrivalImpairment {
            interval_ms: interval,
            lateness_ms: lateness,
            boost_ms,
            until_ms,
        })
    }

    /// Whether the arrival-gap impairment window is still open.
    pub fn impaired(&self, now_ms: f64) -> bool {
        self.impaired_until.is_some_and(|until| now_ms < until)
    }

    pub fn impaired_until(&self) -> Option<f64> {
        self.impaired_until
    }

    /// Milliseconds since the last accepted arrival.
    pub fn stale_ms(&self, now_ms: f64) -> f64 {
        self.last_received_at.map_or(0.0, |last| (now_ms - last).max(0.0))
    }

    pub fn last_received_at(&self) -> Option<f64> {
        self.last_received_at
    }

    /// Smoothed arrival interval, `None` until two arrivals have been seen.
    pub fn interval_ms(&self) -> Option<f64> {
        self.interval_ms
    }

    pub fn jitter_ms(&self) -> f64 {
        self.jitter_ms
    }

    pub fn jitter_delay_ms(&self) -> f64 {
        self.jitter_delay_ms
    }

    pub fn implausible_intervals(&self) -> u64 {
        self.implausible_intervals
    }

    pub fn impairments(&self) -> u64 {
        self.impairments
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 33.0;

    fn feed(stats: &mut ArrivalStats, tuning: &Tuning, times: impl IntoIterator<Item = f64>) {
        for t in times {
            stats.observe(t, TICK, tuning);
        }
    }

    #[test]
    fn test_steady_arrivals_have_no_jitter() {
        let tuning = Tuning::default();
        let mut stats = ArrivalStats::new();
        feed(&mut stats, &tuning, (0..50).map(|i| i as f64 * TICK));
        assert_eq!(stats.interval_ms(), Some(TICK));
        assert!(stats.jitter_ms() < 1e-9);
        assert!(!stats.impaired(50.0 * TICK));
        assert_eq!(stats.impairments(), 0);
    }

    #[test]
    fn test_jitter_delay_is_capped() {
        let tuning = Tuning::default();
        let mut stats = ArrivalStats::new();
        let mut t = 0.0;
        for i in 0..200 {
            t += if i % 2 == 0 { 5.0 } else { 61.0 };
            stats.observe(t, TICK, &tuning);
        }
        assert!(stats.jitter_ms() > 10.0);
        assert!(stats.jitter_delay_ms() <= TICK * tuning.jitter_delay_cap_ticks);
    }

    #[test]
    fn test_implausible_intervals_skipped() {
        let tuning = Tuning::default();
        let mut stats = ArrivalStats::new();
        feed(&mut stats, &tuning, [0.0, 33.0, 66.0]);
        assert!(stats.observe(66.0, TICK, &tuning).is_none());
        assert!(stats.observe(9000.0, TICK, &tuning).is_none());
        assert_eq!(stats.implausible_intervals(), 2);
        assert_eq!(stats.interval_ms(), Some(TICK));
        assert!(!stats.impaired(9000.0));
    }

    #[test]
    fn test_late_arrival_opens_impairment_window() {
        let tuning = Tuning::default();
        let mut stats = ArrivalStats::new();
        feed(&mut stats, &tuning, (0..20).map(|i| i as f64 * TICK));
        let last = 19.0 * TICK;

        let impairment = stats
            .observe(last + 5.0 * TICK, TICK, &tuning)
            .expect("5x tick interval should be an arrival gap");
        assert!(impairment.lateness_ms > tuning.arrival_spike_min_lateness_ms);
        assert!(impairment.boost_ms > 0.0);
        assert!(impairment.boost_ms <= TICK * tuning.arrival_boost_max_ticks);

        let now = last + 5.0 * TICK;
        assert!(stats.impaired(now));
        assert!(impairment.until_ms - now <= tuning.arrival_hold_max_ms);
        assert!(!stats.impaired(impairment.until_ms));
    }

    #[test]
    fn test_slightly_late_arrival_is_ignored() {
        let tuning = Tuning::default();
        let mut stats = ArrivalStats::new();
        feed(&mut stats, &tuning, (0..20).map(|i| i as f64 * TICK));
        assert!(stats.observe(19.0 * TICK + 1.8 * TICK, TICK, &tuning).is_none());
    }

    #[test]
    fn test_stale_ms() {
        let tuning = Tuning::default();
        let mut stats = ArrivalStats::new();
        assert_eq!(stats.stale_ms(100.0), 0.0);
        stats.observe(100.0, TICK, &tuning);
        assert_eq!(stats.stale_ms(140.0), 40.0);
    }
}
