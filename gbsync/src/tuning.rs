//! Runtime tuning: every numeric knob of the sync pipeline, its safe range,
//! and the resolver that folds sparse overrides into an immutable [`Tuning`].
//!
//! Overrides arrive as loosely typed `(name, value)` pairs from a debug
//! console or remote config. [`TuningOverrides::normalize`] drops unknown
//! names and non-finite values and clamps the rest, so a resolved [`Tuning`]
//! is always inside its documented ranges. [`TuningResolver`] swaps a fresh
//! `Arc<Tuning>` in on every apply; readers holding the previous `Arc` keep a
//! consistent set.
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;

/// Exit debounce floor for an arrival-gap spike. That cause clears the
/// easiest, so it is held longer than the others.
pub const MIN_ARRIVAL_GAP_EXIT_CONFIRM_MS: f64 = 420.0;

/// Errors from parsing a single override entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TuningError {
    UnknownKey(String),
    NonFinite { key: TuningKey, value: f64 },
}

impl std::fmt::Display for TuningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TuningError::UnknownKey(key) => write!(f, "Unknown tuning key: {}", key),
            TuningError::NonFinite { key, value } => {
                write!(f, "Tuning value for {} is not finite: {}", key.as_str(), value)
            }
        }
    }
}

impl std::error::Error for TuningError {}

macro_rules! tuning_knobs {
    ($(
        $(#[$doc:meta])*
        $field:ident / $variant:ident = $default:expr, [$min:expr, $max:expr];
    )*) => {
        /// Name of a tunable knob.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum TuningKey {
            $($variant,)*
        }

        impl TuningKey {
            pub const ALL: &'static [TuningKey] = &[$(TuningKey::$variant,)*];

            /// Wire/console name of the knob.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(TuningKey::$variant => stringify!($field),)*
                }
            }

            pub fn default_value(self) -> f64 {
                match self {
                    $(TuningKey::$variant => $default,)*
                }
            }

            /// Inclusive `(min, max)` range the knob is clamped into.
            pub fn range(self) -> (f64, f64) {
                match self {
                    $(TuningKey::$variant => ($min, $max),)*
                }
            }
        }

        impl FromStr for TuningKey {
            type Err = TuningError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                TuningKey::ALL
                    .iter()
                    .copied()
                    .find(|key| key.as_str() == s)
                    .ok_or_else(|| TuningError::UnknownKey(s.to_string()))
            }
        }

        /// Fully resolved tuning. Every field is within [`TuningKey::range`].
        #[derive(Debug, Clone, PartialEq)]
        pub struct Tuning {
            $($(#[$doc])* pub $field: f64,)*
        }

        impl Default for Tuning {
            fn default() -> Self {
                Self {
                    $($field: $default,)*
                }
            }
        }

        impl Tuning {
            pub fn get(&self, key: TuningKey) -> f64 {
                match key {
                    $(TuningKey::$variant => self.$field,)*
                }
            }

            fn slot_mut(&mut self, key: TuningKey) -> &mut f64 {
                match key {
                    $(TuningKey::$variant => &mut self.$field,)*
                }
            }
        }
    };
}

tuning_knobs! {
    /// EWMA factor for the server/local clock offset.
    clock_offset_smoothing / ClockOffsetSmoothing = 0.12, [0.01, 1.0];
    /// Largest offset correction per sample, in ticks.
    clock_offset_max_step_ticks / ClockOffsetMaxStepTicks = 2.0, [0.05, 20.0];
    /// Offset deltas beyond this many ticks are treated as outliers.
    clock_offset_outlier_ticks / ClockOffsetOutlierTicks = 3.0, [0.5, 50.0];
    /// EWMA factor used for outliers and while a spike is active.
    clock_offset_guarded_smoothing / ClockOffsetGuardedSmoothing = 0.05, [0.001, 1.0];
    /// Per-sample correction clamp used for outliers and during spikes, in ticks.
    clock_offset_guarded_max_step_ticks / ClockOffsetGuardedMaxStepTicks = 0.5, [0.01, 5.0];
    tick_smoothing / TickSmoothing = 0.1, [0.01, 1.0];

    interval_smoothing / IntervalSmoothing = 0.1, [0.01, 1.0];
    jitter_smoothing / JitterSmoothing = 0.1, [0.01, 1.0];
    jitter_delay_smoothing / JitterDelaySmoothing = 0.15, [0.01, 1.0];
    /// Cap on the jitter delay contribution, in ticks.
    jitter_delay_cap_ticks / JitterDelayCapTicks = 2.5, [0.0, 10.0];
    /// An arrival interval must exceed this many ticks to count as a gap.
    arrival_spike_interval_ticks / ArrivalSpikeIntervalTicks = 2.2, [1.0, 20.0];
    arrival_spike_jitter_multiplier / ArrivalSpikeJitterMultiplier = 2.5, [0.0, 10.0];
    arrival_spike_margin_ms / ArrivalSpikeMarginMs = 12.0, [0.0, 200.0];
    arrival_spike_min_lateness_ms / ArrivalSpikeMinLatenessMs = 15.0, [0.0, 500.0];
    /// Delay boost per millisecond of lateness.
    arrival_boost_lateness_scale / ArrivalBoostLatenessScale = 0.6, [0.0, 4.0];
    arrival_boost_max_ticks / ArrivalBoostMaxTicks = 3.0, [0.0, 10.0];
    arrival_hold_base_ms / ArrivalHoldBaseMs = 150.0, [0.0, 2000.0];
    arrival_hold_lateness_scale / ArrivalHoldLatenessScale = 1.5, [0.0, 10.0];
    arrival_hold_max_ms / ArrivalHoldMaxMs = 600.0, [0.0, 5000.0];

    /// Gap-free time after which a sequence gap is considered recovered.
    seq_gap_recovery_ms / SeqGapRecoveryMs = 250.0, [0.0, 5000.0];

    /// Staleness threshold in ticks (never below 40ms).
    stale_ticks / StaleTicks = 3.0, [1.0, 50.0];
    spike_enter_confirm_ms / SpikeEnterConfirmMs = 60.0, [0.0, 1000.0];
    spike_exit_confirm_ms / SpikeExitConfirmMs = 180.0, [0.0, 5000.0];
    arrival_gap_exit_confirm_ms / ArrivalGapExitConfirmMs = 420.0, [MIN_ARRIVAL_GAP_EXIT_CONFIRM_MS, 5000.0];
    /// Time after an arrival-gap spike ends before another may start.
    arrival_gap_cooldown_ms / ArrivalGapCooldownMs = 600.0, [0.0, 10000.0];
    /// Delay boost raised on spike entry, in ticks (scaled per cause).
    spike_boost_ticks / SpikeBoostTicks = 1.5, [0.0, 10.0];

    delay_base_ticks / DelayBaseTicks = 1.5, [0.0, 20.0];
    delay_jitter_multiplier / DelayJitterMultiplier = 1.0, [0.0, 10.0];
    delay_min_ticks / DelayMinTicks = 1.0, [0.0, 20.0];
    delay_max_ticks / DelayMaxTicks = 6.0, [0.5, 40.0];
    /// Convergence rate (1/s) while the delay rises.
    delay_rise_rate / DelayRiseRate = 8.0, [0.0, 100.0];
    /// Convergence rate (1/s) while the delay falls.
    delay_fall_rate / DelayFallRate = 2.0, [0.0, 100.0];
    /// Convergence rate (1/s) while the delay rises during a spike.
    delay_spike_rise_rate / DelaySpikeRiseRate = 16.0, [0.0, 200.0];
    /// Linear boost decay outside spikes, in ms per second.
    boost_decay_ms_per_sec / BoostDecayMsPerSec = 60.0, [0.0, 5000.0];
    max_extrapolation_ms / MaxExtrapolationMs = 120.0, [0.0, 1000.0];
    spike_max_extrapolation_ms / SpikeMaxExtrapolationMs = 40.0, [0.0, 1000.0];

    /// Local entity blend rate (1/s) in calm conditions.
    stabilizer_rate / StabilizerRate = 30.0, [0.0, 240.0];
    stabilizer_mild_rate / StabilizerMildRate = 14.0, [0.0, 240.0];
    stabilizer_spike_rate / StabilizerSpikeRate = 6.0, [0.0, 240.0];
    /// Delay boost, as a fraction of a tick, above which the stabilizer damps hardest.
    stabilizer_boost_tick_fraction / StabilizerBoostTickFraction = 0.85, [0.0, 5.0];
}

impl Tuning {
    /// Builds a tuning from defaults with `overrides` applied on top.
    pub fn resolve(overrides: &TuningOverrides) -> Self {
        let mut tuning = Tuning::default();
        for (&key, &value) in overrides.iter() {
            tuning.set_clamped(key, value);
        }
        tuning.enforce_relations();
        tuning
    }

    /// Set a knob, clamping into its range. Non-finite values are ignored.
    pub fn set_clamped(&mut self, key: TuningKey, value: f64) {
        if !value.is_finite() {
            return;
        }
        let (min, max) = key.range();
        *self.slot_mut(key) = value.clamp(min, max);
    }

    fn enforce_relations(&mut self) {
        if self.delay_max_ticks < self.delay_min_ticks {
            self.delay_max_ticks = self.delay_min_ticks;
        }
        if self.spike_max_extrapolation_ms > self.max_extrapolation_ms {
            self.spike_max_extrapolation_ms = self.max_extrapolation_ms;
        }
    }
}

/// A sparse, validated set of knob overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuningOverrides {
    values: BTreeMap<TuningKey, f64>,
}

impl TuningOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize raw `(name, value)` pairs. Unknown names and non-finite values
    /// are dropped; everything else is clamped into range.
    pub fn normalize<I, K>(raw: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut overrides = Self::new();
        for (name, value) in raw {
            if let Err(e) = overrides.try_set(name.as_ref(), value) {
                debug!("Dropping tuning override: {}", e);
            }
        }
        overrides
    }

    /// Parse and insert a single override, clamping it into range.
    pub fn try_set(&mut self, name: &str, value: f64) -> Result<(), TuningError> {
        let key: TuningKey = name.parse()?;
        if !value.is_finite() {
            return Err(TuningError::NonFinite { key, value });
        }
        self.set(key, value);
        Ok(())
    }

    /// Insert an override by key, clamping it into range.
    pub fn set(&mut self, key: TuningKey, value: f64) {
        let (min, max) = key.range();
        if value.is_finite() {
            self.values.insert(key, value.clamp(min, max));
        }
    }

    pub fn with(mut self, key: TuningKey, value: f64) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: TuningKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TuningKey, &f64)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of applying overrides.
#[derive(Debug, Clone)]
pub struct TuningUpdate {
    pub revision: u64,
    pub overrides: TuningOverrides,
    pub resolved: Arc<Tuning>,
}

/// Owns the active override set and the resolved tuning it produces.
#[derive(Debug)]
pub struct TuningResolver {
    overrides: TuningOverrides,
    resolved: Arc<Tuning>,
    revision: u64,
}

impl TuningResolver {
    /// Resolve an initial override set. The revision starts at 0.
    pub fn new(initial: TuningOverrides) -> Self {
        let resolved = Arc::new(Tuning::resolve(&initial));
        Self {
            overrides: initial,
            resolved,
            revision: 0,
        }
    }

    /// Replace the active overrides, re-resolve, and bump the revision.
    pub fn apply(&mut self, overrides: TuningOverrides) -> TuningUpdate {
        self.resolved = Arc::new(Tuning::resolve(&overrides));
        self.overrides = overrides;
        self.revision += 1;
        TuningUpdate {
            revision: self.revision,
            overrides: self.overrides.clone(),
            resolved: Arc::clone(&self.resolved),
        }
    }

    /// Drop every override. Equivalent to applying an empty set.
    pub fn reset(&mut self) -> TuningUpdate {
        self.apply(TuningOverrides::new())
    }

    pub fn tuning(&self) -> &Tuning {
        &self.resolved
    }

    /// Shared handle to the current tuning.
    pub fn shared(&self) -> Arc<Tuning> {
        Arc::clone(&self.resolved)
    }

    pub fn overrides(&self) -> &TuningOverrides {
        &self.overrides
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl Default for TuningResolver {
    fn default() -> Self {
        Self::new(TuningOverrides::new())
    }
}
