//! # GB-Sync
//!
//! Client-side state synchronization for real-time multiplayer games: turns a
//! sparse, jittery, occasionally reordered stream of authoritative world
//! snapshots into a smooth render-time view of the world.
//!
//! Like GB-Net, GB-Sync uses a synchronous, polling game-loop model. The host
//! feeds snapshots as they arrive and samples once per frame. The crate never
//! reads a clock; all times are milliseconds supplied by the caller.
//!
//! ## Features
//!
//! - **Sequence continuity**: duplicate and out-of-order rejection, sticky
//!   sequence-gap detection with a recovery window
//! - **Clock estimation**: server/local offset with outlier guarding, server
//!   tick estimation
//! - **Arrival statistics**: interval/jitter EWMAs, capped jitter delay,
//!   arrival-gap impairment windows
//! - **Lag-spike hysteresis**: debounced stale / seq-gap / arrival-gap spikes
//!   with immediate escalation and an arrival-gap re-entry cooldown
//! - **Adaptive playout delay**: asymmetric smoothing toward a tick-relative
//!   target with spike boost and decay
//! - **Local entity stabilization**: damped, tail-biased blending of the
//!   player's own shape during degraded conditions
//! - **Hot tuning**: clamped, revisioned overrides swapped in atomically
//!
//! ## Quick Start
//!
//! ```
//! use gbsync::prelude::*;
//!
//! #[derive(Clone)]
//! struct Ball {
//!     id: EntityId,
//!     pos: [Point3; 1],
//! }
//!
//! impl SyncEntity for Ball {
//!     fn id(&self) -> EntityId {
//!         self.id
//!     }
//!     fn lerp(&self, other: &Self, t: f32) -> Self {
//!         Ball { id: self.id, pos: [self.pos[0].lerp(other.pos[0], t)] }
//!     }
//!     fn shape(&self) -> &[Point3] {
//!         &self.pos
//!     }
//!     fn set_shape(&mut self, points: &[Point3]) {
//!         self.pos[0] = points[0];
//!     }
//! }
//!
//! let mut sync: SnapshotSync<Ball> = SnapshotSync::new(SyncConfig::default()).unwrap();
//! let ball = |x| vec![Ball { id: 1, pos: [Point3::new(x, 0.0, 0.0)] }];
//!
//! sync.push_snapshot(Snapshot::new(1, 1000.0, ball(0.0)), 0.0);
//! sync.push_snapshot(Snapshot::new(2, 1050.0, ball(5.0)), 50.0);
//!
//! let world = sync.sample(66.0, 1.0 / 60.0).expect("snapshots were pushed");
//! assert_eq!(world.entities.len(), 1);
//! ```

pub mod arrival;
pub mod clock;
pub mod config;
pub mod entity;
pub mod events;
pub mod interpolation;
pub mod playout;
pub mod sequence;
pub mod simulator;
pub mod spike;
pub mod stabilizer;
pub mod stats;
pub mod sync;
pub mod tuning;
pub mod util;


pub use arrival::{ArrivalImpairment, ArrivalStats};
pub use clock::ClockOffsetEstimator;
pub use config::{ConfigError, SimulationConfig, SyncConfig};
pub use entity::{EntityId, Point3, SyncEntity};
pub use events::{EventLog, EventSink, SyncEvent, SyncEventKind};
pub use interpolation::{BufferSample, SampleMode, Snapshot, SnapshotBuffer, TimedSnapshot};
pub use playout::{PlayoutController, PlayoutDecision};
pub use sequence::{SequenceTracker, SequenceVerdict};
pub use simulator::{apply_stall, ArrivalSimulator, SimulatedArrival};
pub use spike::{LagSpikeCause, LagSpikeDetector, SpikeSignals, SpikeState, SpikeTransition};
pub use stabilizer::{LocalEntityStabilizer, StabilizerContext, StabilizerTier};
pub use stats::{SyncDebugState, SyncStats};
pub use sync::SnapshotSync;
pub use tuning::{Tuning, TuningError, TuningKey, TuningOverrides, TuningResolver, TuningUpdate};
pub use util::{sequence_diff, sequence_greater_than};

/// Unified error type encompassing all GB-Sync error variants.
#[derive(Debug)]
pub enum SyncError {
    Config(ConfigError),
    Tuning(TuningError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Config(e) => write!(f, "Config error: {}", e),
            SyncError::Tuning(e) => write!(f, "Tuning error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::Config(err)
    }
}

impl From<TuningError> for SyncError {
    fn from(err: TuningError) -> Self {
        SyncError::Tuning(err)
    }
}

/// Prelude: import everything commonly needed.
pub mod prelude {
    pub use crate::{
        EntityId, EventLog, EventSink, LagSpikeCause, Point3, SequenceVerdict, Snapshot,
        SnapshotSync, SpikeState, SyncConfig, SyncDebugState, SyncEntity, SyncError, SyncEvent,
        SyncEventKind, SyncStats, TuningKey, TuningOverrides,
    };
}
