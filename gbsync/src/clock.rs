//! Server/local clock offset estimation and server tick-interval tracking.
//!
//! The offset is seeded from the first sample and then smoothed. Samples
//! taken during a lag spike, or ones that jump by more than a few ticks, go
//! through a tighter clamp and a smaller smoothing factor. A single bad packet
//! can only nudge the shared time reference, while a genuine shift still
//! converges over a run of consistent samples.
use crate::config::MAX_PLAUSIBLE_TICK_MS;
use crate::tuning::Tuning;
use crate::util::ewma;

/// Tracks `server_time - local_time` and the server's snapshot interval.
#[derive(Debug)]
pub struct ClockOffsetEstimator {
    offset_ms: Option<f64>,
    tick_ms: f64,
    has_tick_sample: bool,
    last_server_time: Option<f64>,
    guarded_samples: u64,
}

impl ClockOffsetEstimator {
    pub fn new(default_tick_ms: f64) -> Self {
        Self {
            offset_ms: None,
            tick_ms: default_tick_ms,
            has_tick_sample: false,
            last_server_time: None,
            guarded_samples: 0,
        }
    }

    /// Feed an accepted snapshot. `seq_span` is the sequence distance from the
    /// previously accepted snapshot (0 for the first one). Non-finite times
    /// are ignored.
    pub fn observe(
        &mut self,
        server_time: f64,
        now_ms: f64,
        seq_span: u64,
        spike_active: bool,
        tuning: &Tuning,
    ) {
        if !server_time.is_finite() || !now_ms.is_finite() {
            return;
        }
        self.update_tick(server_time, seq_span, tuning);

        let sample = server_time - now_ms;
        let Some(offset) = self.offset_ms else {
            self.offset_ms = Some(sample);
            return;
        };

        let raw_delta = sample - offset;
        let outlier = raw_delta.abs() > self.tick_ms * tuning.clock_offset_outlier_ticks;
        let (smoothing, max_step) = if spike_active || outlier {
            self.guarded_samples += 1;
            (
                tuning.clock_offset_guarded_smoothing,
                self.tick_ms * tuning.clock_offset_guarded_max_step_ticks,
            )
        } else {
            (
                tuning.clock_offset_smoothing,
                self.tick_ms * tuning.clock_offset_max_step_ticks,
            )
        };

        let delta = raw_delta.clamp(-max_step, max_step);
        self.offset_ms = Some(offset + delta * smoothing);
    }

    fn update_tick(&mut self, server_time: f64, seq_span: u64, tuning: &Tuning) {
        if let Some(last) = self.last_server_time {
            // A delta spanning a gap covers several ticks
            let per_tick = (server_time - last) / seq_span.max(1) as f64;
            if per_tick > 0.0 && per_tick <= MAX_PLAUSIBLE_TICK_MS {
                if self.has_tick_sample {
                    self.tick_ms = ewma(self.tick_ms, per_tick, tuning.tick_smoothing);
                } else {
                    self.tick_ms = per_tick;
                    self.has_tick_sample = true;
                }
            }
        }
        self.last_server_time = Some(server_time);
    }

    /// Current offset estimate in milliseconds, 0 before the first sample.
    pub fn offset_ms(&self) -> f64 {
        self.offset_ms.unwrap_or(0.0)
    }

    pub fn has_offset(&self) -> bool {
        self.offset_ms.is_some()
    }

    /// Map local time onto the server clock.
    pub fn server_now(&self, now_ms: f64) -> f64 {
        now_ms + self.offset_ms()
    }

    /// Estimated server tick duration in milliseconds.
    pub fn tick_ms(&self) -> f64 {
        self.tick_ms
    }

    /// Samples that went through the guarded (outlier/spike) path.
    pub fn guarded_samples(&self) -> u64 {
        self.guarded_samples
    }

    pub fn reset(&mut self, default_tick_ms: f64) {
        *self = Self::new(default_tick_ms);
    }
}
