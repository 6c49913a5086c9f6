//! Lag-spike detection with hysteresis.
//!
//! Three instantaneous signals (staleness, sequence gap, arrival gap) collapse
//! into one [`LagSpikeCause`]. [`LagSpikeDetector`] debounces it into an
//! [`SpikeState`]:
//!
//! - `Inactive -> Active` once a cause has held for `spike_enter_confirm_ms`.
//!   Arrival-gap entry is additionally blocked during the cooldown armed when
//!   a previous arrival-gap spike ended.
//! - While `Active`, cause changes apply immediately.
//! - `Active -> Inactive` once no cause has been seen for
//!   `spike_exit_confirm_ms`, or `arrival_gap_exit_confirm_ms` for an
//!   arrival-gap spike.
use crate::config::MIN_STALE_THRESHOLD_MS;
use crate::tuning::Tuning;

/// Why a spike is (or would be) active. Variants are mutually exclusive and
/// listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LagSpikeCause {
    #[default]
    None,
    Stale,
    SeqGap,
    ArrivalGap,
}

impl LagSpikeCause {
    pub fn as_str(self) -> &'static str {
        match self {
            LagSpikeCause::None => "none",
            LagSpikeCause::Stale => "stale",
            LagSpikeCause::SeqGap => "seq-gap",
            LagSpikeCause::ArrivalGap => "arrival-gap",
        }
    }

    pub fn is_none(self) -> bool {
        self == LagSpikeCause::None
    }

    /// Multiplier on the entry delay boost.
    pub fn boost_scale(self) -> f64 {
        match self {
            LagSpikeCause::ArrivalGap => 0.45,
            LagSpikeCause::Stale => 1.0,
            LagSpikeCause::SeqGap | LagSpikeCause::None => 1.2,
        }
    }
}

impl std::fmt::Display for LagSpikeCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Debounced spike state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SpikeState {
    #[default]
    Inactive,
    Active { cause: LagSpikeCause, since_ms: f64 },
}

impl SpikeState {
    pub fn is_active(&self) -> bool {
        matches!(self, SpikeState::Active { .. })
    }

    /// Active cause, or [`LagSpikeCause::None`] while inactive.
    pub fn cause(&self) -> LagSpikeCause {
        match self {
            SpikeState::Active { cause, .. } => *cause,
            SpikeState::Inactive => LagSpikeCause::None,
        }
    }
}

/// Raw inputs for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeSignals {
    /// Time since the last accepted snapshot arrived.
    pub stale_ms: f64,
    pub tick_ms: f64,
    pub seq_gap: bool,
    pub arrival_impaired: bool,
}

impl SpikeSignals {
    /// The instantaneous cause: the first true signal in priority order.
    pub fn cause(&self, tuning: &Tuning) -> LagSpikeCause {
        let stale_threshold = MIN_STALE_THRESHOLD_MS.max(self.tick_ms * tuning.stale_ticks);
        if self.stale_ms > stale_threshold {
            LagSpikeCause::Stale
        } else if self.seq_gap {
            LagSpikeCause::SeqGap
        } else if self.arrival_impaired {
            LagSpikeCause::ArrivalGap
        } else {
            LagSpikeCause::None
        }
    }
}

/// An actual change of state or cause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpikeTransition {
    Entered {
        cause: LagSpikeCause,
    },
    CauseChanged {
        from: LagSpikeCause,
        to: LagSpikeCause,
    },
    Exited {
        cause: LagSpikeCause,
        duration_ms: f64,
    },
}

/// Hysteresis state machine over [`SpikeSignals`].
#[derive(Debug, Default)]
pub struct LagSpikeDetector {
    state: SpikeState,
    enter_candidate_since: Option<f64>,
    exit_candidate_since: Option<f64>,
    arrival_gap_cooldown_until: Option<f64>,
}

impl LagSpikeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate once per render sample. Returns a transition only when the
    /// state or the active cause actually changed.
    pub fn evaluate(
        &mut self,
        now_ms: f64,
        signals: &SpikeSignals,
        tuning: &Tuning,
    ) -> Option<SpikeTransition> {
        let instant = signals.cause(tuning);
        match self.state {
            SpikeState::Inactive => self.evaluate_inactive(now_ms, instant, tuning),
            SpikeState::Active { cause, since_ms } => {
                self.evaluate_active(now_ms, instant, cause, since_ms, tuning)
            }
        }
    }

    fn evaluate_inactive(
        &mut self,
        now_ms: f64,
        instant: LagSpikeCause,
        tuning: &Tuning,
    ) -> Option<SpikeTransition> {
        let blocked = instant == LagSpikeCause::ArrivalGap && self.in_cooldown(now_ms);
        if instant.is_none() || blocked {
            self.enter_candidate_since = None;
            return None;
        }

        let since = *self.enter_candidate_since.get_or_insert(now_ms);
        if now_ms - since < tuning.spike_enter_confirm_ms {
            return None;
        }

        self.enter_candidate_since = None;
        self.exit_candidate_since = None;
        self.state = SpikeState::Active {
            cause: instant,
            since_ms: now_ms,
        };
        Some(SpikeTransition::Entered { cause: instant })
    }

    fn evaluate_active(
        &mut self,
        now_ms: f64,
        instant: LagSpikeCause,
        cause: LagSpikeCause,
        since_ms: f64,
        tuning: &Tuning,
    ) -> Option<SpikeTransition> {
        if !instant.is_none() {
            self.exit_candidate_since = None;
            if instant == cause {
                return None;
            }
            self.state = SpikeState::Active {
                cause: instant,
                since_ms,
            };
            return Some(SpikeTransition::CauseChanged {
                from: cause,
                to: instant,
            });
        }

        let required = if cause == LagSpikeCause::ArrivalGap {
            tuning.arrival_gap_exit_confirm_ms
        } else {
            tuning.spike_exit_confirm_ms
        };
        let quiet_since = *self.exit_candidate_since.get_or_insert(now_ms);
        if now_ms - quiet_since < required {
            return None;
        }

        self.exit_candidate_since = None;
        self.state = SpikeState::Inactive;
        if cause == LagSpikeCause::ArrivalGap {
            self.arrival_gap_cooldown_until = Some(now_ms + tuning.arrival_gap_cooldown_ms);
        }
        Some(SpikeTransition::Exited {
            cause,
            duration_ms: now_ms - since_ms,
        })
    }

    fn in_cooldown(&self, now_ms: f64) -> bool {
        self.arrival_gap_cooldown_until
            .is_some_and(|until| now_ms < until)
    }

    pub fn state(&self) -> SpikeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn cause(&self) -> LagSpikeCause {
        self.state.cause()
    }

    pub fn arrival_gap_cooldown_until(&self) -> Option<f64> {
        self.arrival_gap_cooldown_until
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
