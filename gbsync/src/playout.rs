//! Adaptive playout delay.
//!
//! The target delay is `base + jitter_delay * multiplier + boost`, clamped to
//! `[delay_min_ticks, delay_max_ticks]` of the estimated tick. The live delay
//! converges toward the target exponentially: quickly when rising (faster
//! still during a spike, to avoid running dry) and slowly when falling, so
//! recovery does not visibly rubber-band. The boost decays linearly outside
//! spikes and holds while one is active.
use crate::spike::LagSpikeCause;
use crate::tuning::Tuning;
use crate::util::smoothing_alpha;

/// Output of one playout update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayoutDecision {
    pub delay_ms: f64,
    pub target_ms: f64,
    pub min_delay_ms: f64,
    pub max_delay_ms: f64,
    pub max_extrapolation_ms: f64,
}

/// Owns the delay boost and the smoothed playout delay.
#[derive(Debug, Default)]
pub struct PlayoutController {
    delay_boost_ms: f64,
    delay_ms: Option<f64>,
    target_ms: f64,
}

impl PlayoutController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the boost to at least `boost_ms`. Never lowers it.
    pub fn raise_boost(&mut self, boost_ms: f64) {
        if boost_ms.is_finite() && boost_ms > self.delay_boost_ms {
            self.delay_boost_ms = boost_ms;
        }
    }

    /// Entry compensation for a spike of `cause`.
    pub fn on_spike_entered(&mut self, cause: LagSpikeCause, tick_ms: f64, tuning: &Tuning) {
        self.raise_boost(tick_ms * tuning.spike_boost_ticks * cause.boost_scale());
    }

    /// Advance by `dt_secs` and return the delay to render with.
    pub fn update(
        &mut self,
        dt_secs: f64,
        tick_ms: f64,
        jitter_delay_ms: f64,
        spike_active: bool,
        tuning: &Tuning,
    ) -> PlayoutDecision {
        let dt_secs = dt_secs.max(0.0);
        if !spike_active {
            self.delay_boost_ms =
                (self.delay_boost_ms - tuning.boost_decay_ms_per_sec * dt_secs).max(0.0);
        }

        let min_delay_ms = tick_ms * tuning.delay_min_ticks;
        let max_delay_ms = (tick_ms * tuning.delay_max_ticks).max(min_delay_ms);
        let target = tick_ms * tuning.delay_base_ticks
            + jitter_delay_ms * tuning.delay_jitter_multiplier
            + self.delay_boost_ms;
        let target = target.clamp(min_delay_ms, max_delay_ms);

        let delay = match self.delay_ms {
            None => target,
            Some(current) => {
                let rate = if target > current {
                    if spike_active {
                        tuning.delay_spike_rise_rate
                    } else {
                        tuning.delay_rise_rate
                    }
                } else {
                    tuning.delay_fall_rate
                };
                current + (target - current) * smoothing_alpha(rate, dt_secs)
            }
        };
        let delay = delay.clamp(min_delay_ms, max_delay_ms);

        self.delay_ms = Some(delay);
        self.target_ms = target;

        PlayoutDecision {
            delay_ms: delay,
            target_ms: target,
            min_delay_ms,
            max_delay_ms,
            max_extrapolation_ms: if spike_active {
                tuning.spike_max_extrapolation_ms
            } else {
                tuning.max_extrapolation_ms
            },
        }
    }

    pub fn delay_boost_ms(&self) -> f64 {
        self.delay_boost_ms
    }

    /// Current playout delay, 0 before the first update.
    pub fn delay_ms(&self) -> f64 {
        self.delay_ms.unwrap_or(0.0)
    }

    pub fn target_ms(&self) -> f64 {
        self.target_ms
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Server-clock time to render at.
pub fn render_time(now_ms: f64, clock_offset_ms: f64, delay_ms: f64) -> f64 {
    now_ms + clock_offset_ms - delay_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 33.0;
    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn test_first_update_starts_at_target() {
        let tuning = Tuning::default();
        let mut playout = PlayoutController::new();
        let decision = playout.update(DT, TICK, 0.0, false, &tuning);
        assert_eq!(decision.delay_ms, TICK * tuning.delay_base_ticks);
        assert_eq!(decision.max_extrapolation_ms, tuning.max_extrapolation_ms);
    }

    #[test]
    fn test_rise_faster_than_fall() {
        let tuning = Tuning::default();
        let mut rising = PlayoutController::new();
        rising.update(DT, TICK, 0.0, false, &tuning);
        let base = rising.delay_ms();
        let up = rising.update(DT, TICK, 30.0, false, &tuning).delay_ms - base;

        let mut falling = PlayoutController::new();
        falling.update(DT, TICK, 30.0, false, &tuning);
        let high = falling.delay_ms();
        let down = high - falling.update(DT, TICK, 0.0, false, &tuning).delay_ms;

        assert!(up > 0.0 && down > 0.0);
        assert!(up > down, "rise {} should outpace fall {}", up, down);
    }

    #[test]
    fn test_spike_rises_fastest() {
        let tuning = Tuning::default();
        let mut calm = PlayoutController::new();
        let mut spiking = PlayoutController::new();
        calm.update(DT, TICK, 0.0, false, &tuning);
        spiking.update(DT, TICK, 0.0, true, &tuning);
        let calm_delay = calm.update(DT, TICK, 40.0, false, &tuning).delay_ms;
        let spike = spiking.update(DT, TICK, 40.0, true, &tuning);
        assert!(spike.delay_ms > calm_delay);
        assert_eq!(spike.max_extrapolation_ms, tuning.spike_max_extrapolation_ms);
    }

    #[test]
    fn test_boost_holds_during_spike_and_decays_after() {
        let tuning = Tuning::default();
        let mut playout = PlayoutController::new();
        playout.on_spike_entered(LagSpikeCause::Stale, TICK, &tuning);
        let boost = playout.delay_boost_ms();
        assert_eq!(boost, TICK * tuning.spike_boost_ticks);

        playout.update(0.5, TICK, 0.0, true, &tuning);
        assert_eq!(playout.delay_boost_ms(), boost);

        playout.update(0.5, TICK, 0.0, false, &tuning);
        assert_eq!(
            playout.delay_boost_ms(),
            (boost - tuning.boost_decay_ms_per_sec * 0.5).max(0.0)
        );
        playout.update(10.0, TICK, 0.0, false, &tuning);
        assert_eq!(playout.delay_boost_ms(), 0.0);
    }

    #[test]
    fn test_boost_is_monotonic_on_raise() {
        let tuning = Tuning::default();
        let mut playout = PlayoutController::new();
        playout.on_spike_entered(LagSpikeCause::SeqGap, TICK, &tuning);
        let high = playout.delay_boost_ms();
        playout.on_spike_entered(LagSpikeCause::ArrivalGap, TICK, &tuning);
        assert_eq!(playout.delay_boost_ms(), high);
        playout.raise_boost(f64::NAN);
        assert_eq!(playout.delay_boost_ms(), high);
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let tuning = Tuning::default();
        let mut playout = PlayoutController::new();
        let inputs = [
            (0.016, 33.0, 0.0, false),
            (0.016, 33.0, 5000.0, true),
            (2.0, 33.0, 5000.0, false),
            (0.016, 10.0, 0.0, false),
            (0.0, 200.0, 0.0, false),
            (5.0, 33.0, 0.0, false),
        ];
        for _ in 0..20 {
            playout.raise_boost(400.0);
            for &(dt, tick, jitter, spike) in &inputs {
                let d = playout.update(dt, tick, jitter, spike, &tuning);
                assert!(d.delay_ms >= d.min_delay_ms && d.delay_ms <= d.max_delay_ms);
                assert!(d.target_ms >= d.min_delay_ms && d.target_ms <= d.max_delay_ms);
            }
        }
    }

    #[test]
    fn test_render_time() {
        assert_eq!(render_time(100.0, 1000.0, 50.0), 1050.0);
    }
}
