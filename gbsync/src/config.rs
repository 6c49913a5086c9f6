//! Sync configuration constants and structures.
//!
//! [`SyncConfig`] holds the structural parameters fixed for a connection's
//! lifetime: buffer capacity, event log size, and the tick assumed before any
//! server timing has been observed. Hot-swappable knobs live in
//! [`crate::tuning`]. [`SimulationConfig`] drives the arrival simulator.
use crate::tuning::TuningOverrides;

pub const DEFAULT_BUFFER_CAPACITY: usize = 32;
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 256;
pub const DEFAULT_TICK_MS: f64 = 50.0;

/// Smallest buffer that can still bracket a render time.
pub const MIN_BUFFER_CAPACITY: usize = 2;

/// Arrival intervals outside `(0, MAX_PLAUSIBLE_INTERVAL_MS]` are skipped
/// (backgrounded tab, suspended process).
pub const MAX_PLAUSIBLE_INTERVAL_MS: f64 = 5000.0;
/// Server-time deltas above this are not used for tick estimation.
pub const MAX_PLAUSIBLE_TICK_MS: f64 = 1000.0;
/// Staleness never counts as a spike below this many milliseconds.
pub const MIN_STALE_THRESHOLD_MS: f64 = 40.0;

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidBufferCapacity,
    InvalidEventLogCapacity,
    InvalidDefaultTick,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidBufferCapacity => {
                write!(f, "buffer_capacity must be >= {MIN_BUFFER_CAPACITY}")
            }
            ConfigError::InvalidEventLogCapacity => {
                write!(f, "event_log_capacity must be > 0")
            }
            ConfigError::InvalidDefaultTick => {
                write!(
                    f,
                    "default_tick_ms must be > 0.0 and <= {MAX_PLAUSIBLE_TICK_MS}"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Structural configuration for a [`crate::SnapshotSync`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub buffer_capacity: usize,
    pub event_log_capacity: usize,
    pub default_tick_ms: f64,
    pub initial_tuning: TuningOverrides,
}

impl SyncConfig {
    /// Validates the configuration, returning an error if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity < MIN_BUFFER_CAPACITY {
            return Err(ConfigError::InvalidBufferCapacity);
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::InvalidEventLogCapacity);
        }
        if !(self.default_tick_ms > 0.0 && self.default_tick_ms <= MAX_PLAUSIBLE_TICK_MS) {
            return Err(ConfigError::InvalidDefaultTick);
        }
        Ok(())
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }
    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self
    }
    pub fn with_default_tick_ms(mut self, tick_ms: f64) -> Self {
        self.default_tick_ms = tick_ms;
        self
    }
    pub fn with_tuning_overrides(mut self, overrides: TuningOverrides) -> Self {
        self.initial_tuning = overrides;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            default_tick_ms: DEFAULT_TICK_MS,
            initial_tuning: TuningOverrides::new(),
        }
    }
}

/// Network conditions for [`crate::simulator::ArrivalSimulator`].
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub tick_ms: f64,
    pub packet_loss: f32,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub duplicate_chance: f32,
    pub out_of_order_chance: f32,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            packet_loss: 0.0,
            latency_ms: 0.0,
            jitter_ms: 0.0,
            duplicate_chance: 0.0,
            out_of_order_chance: 0.0,
            seed: 0,
        }
    }
}
