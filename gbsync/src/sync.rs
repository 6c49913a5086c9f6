//! Client-side snapshot synchronization.
//!
//! [`SnapshotSync`] owns every piece of runtime state for one connection and
//! is driven from two places in the host's event loop:
//!
//! - [`SnapshotSync::push_snapshot`] when a snapshot arrives: sequence check,
//!   clock and arrival statistics, then buffering.
//! - [`SnapshotSync::sample`] once per rendered frame: spike evaluation,
//!   playout delay, buffer sampling, then local-entity stabilization.
//!
//! Neither call blocks or fails. Bad input is dropped, counted, and reported
//! as an event.
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::arrival::ArrivalStats;
use crate::clock::ClockOffsetEstimator;
use crate::config::{ConfigError, SyncConfig};
use crate::entity::{EntityId, SyncEntity};
use crate::events::{EventLog, EventSink, SyncEvent, SyncEventKind};
use crate::interpolation::{SampleMode, Snapshot, SnapshotBuffer};
use crate::playout::{self, PlayoutController};
use crate::sequence::{SequenceTracker, SequenceVerdict};
use crate::spike::{LagSpikeDetector, SpikeSignals, SpikeState, SpikeTransition};
use crate::stabilizer::{LocalEntityStabilizer, StabilizerContext};
use crate::stats::{SyncDebugState, SyncStats};
use crate::tuning::{Tuning, TuningError, TuningOverrides, TuningResolver, TuningUpdate};

/// Snapshot buffering, adaptive playout, and lag-spike compensation for one
/// server connection.
pub struct SnapshotSync<E: SyncEntity, S: EventSink = EventLog> {
    config: SyncConfig,
    tuning: TuningResolver,

    sequence: SequenceTracker,
    clock: ClockOffsetEstimator,
    arrival: ArrivalStats,
    buffer: SnapshotBuffer<E>,
    spike: LagSpikeDetector,
    playout: PlayoutController,
    stabilizer: LocalEntityStabilizer,

    local_entity: Option<EntityId>,
    camera_hold: bool,
    last_now_ms: f64,
    last_render_time: Option<f64>,

    stats: SyncStats,
    sink: S,
}

impl<E: SyncEntity> SnapshotSync<E, EventLog> {
    /// Create with a bounded in-memory [`EventLog`] sized from the config.
    pub fn new(config: SyncConfig) -> Result<Self, ConfigError> {
        let sink = EventLog::new(config.event_log_capacity);
        Self::with_sink(config, sink)
    }

    pub fn events(&self) -> &EventLog {
        &self.sink
    }

    /// Remove and return logged events, oldest first.
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.sink.drain()
    }
}

impl<E: SyncEntity, S: EventSink> SnapshotSync<E, S> {
    /// Create with a host-provided event sink.
    pub fn with_sink(config: SyncConfig, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tuning: TuningResolver::new(config.initial_tuning.clone()),
            sequence: SequenceTracker::new(),
            clock: ClockOffsetEstimator::new(config.default_tick_ms),
            arrival: ArrivalStats::new(),
            buffer: SnapshotBuffer::new(config.buffer_capacity),
            spike: LagSpikeDetector::new(),
            playout: PlayoutController::new(),
            stabilizer: LocalEntityStabilizer::new(),
            local_entity: None,
            camera_hold: false,
            last_now_ms: 0.0,
            last_render_time: None,
            stats: SyncStats::default(),
            sink,
            config,
        })
    }

    /// Ingest a snapshot received at local time `now_ms`.
    pub fn push_snapshot(&mut self, snapshot: Snapshot<E>, now_ms: f64) -> SequenceVerdict {
        self.stats.snapshots_received += 1;
        if !snapshot.server_time.is_finite() || !now_ms.is_finite() {
            self.stats.malformed_dropped += 1;
            debug!(
                "Dropping snapshot {} with non-finite time (server {}, local {})",
                snapshot.seq, snapshot.server_time, now_ms
            );
            self.emit(
                self.last_now_ms,
                SyncEventKind::MalformedDropped { seq: snapshot.seq },
            );
            return SequenceVerdict::Malformed;
        }
        self.last_now_ms = now_ms;
        let tuning = self.tuning.shared();

        let previous = self.sequence.latest();
        let verdict = self
            .sequence
            .observe(snapshot.seq, now_ms, tuning.seq_gap_recovery_ms);

        let gap = match verdict {
            SequenceVerdict::Malformed => return verdict,
            SequenceVerdict::Duplicate => {
                self.stats.duplicates_dropped += 1;
                debug!("Dropping duplicate snapshot {}", snapshot.seq);
                self.emit(now_ms, SyncEventKind::DuplicateDropped { seq: snapshot.seq });
                return verdict;
            }
            SequenceVerdict::OutOfOrder { latest } => {
                self.stats.out_of_order_dropped += 1;
                debug!(
                    "Dropping out-of-order snapshot {} (latest {})",
                    snapshot.seq, latest
                );
                self.emit(
                    now_ms,
                    SyncEventKind::OutOfOrderDropped {
                        seq: snapshot.seq,
                        latest,
                    },
                );
                return verdict;
            }
            SequenceVerdict::Accepted { gap } => gap,
        };

        self.stats.snapshots_accepted += 1;
        if let Some(previous) = previous.filter(|_| gap > 1) {
            self.stats.sequence_gaps += 1;
            self.stats.snapshots_missing += gap - 1;
            warn!(
                "Sequence gap: {} -> {} ({} missing)",
                previous,
                snapshot.seq,
                gap - 1
            );
            self.emit(
                now_ms,
                SyncEventKind::SequenceGap {
                    previous,
                    received: snapshot.seq,
                    gap,
                },
            );
        }

        self.clock.observe(
            snapshot.server_time,
            now_ms,
            gap,
            self.spike.is_active(),
            &tuning,
        );

        let implausible_before = self.arrival.implausible_intervals();
        if let Some(impairment) = self.arrival.observe(now_ms, self.clock.tick_ms(), &tuning) {
            self.stats.arrival_impairments += 1;
            self.playout.raise_boost(impairment.boost_ms);
        }
        self.stats.implausible_intervals += self.arrival.implausible_intervals() - implausible_before;

        trace!(
            "Snapshot {} at server {:.1}ms, offset {:.1}ms, tick {:.1}ms",
            snapshot.seq,
            snapshot.server_time,
            self.clock.offset_ms(),
            self.clock.tick_ms()
        );
        let buffered = self.buffer.push(snapshot, now_ms);
        debug_assert!(buffered, "sequence tracker admitted a buffered seq");
        verdict
    }

    /// Produce the world to render at local time `now_ms`, `dt_secs` after
    /// the previous frame. Returns `None` until a snapshot has been received.
    pub fn sample(&mut self, now_ms: f64, dt_secs: f64) -> Option<Snapshot<E>> {
        self.last_now_ms = now_ms;
        if self.buffer.is_empty() {
            return None;
        }
        let tuning = self.tuning.shared();
        self.sequence.refresh(now_ms, tuning.seq_gap_recovery_ms);

        let tick_ms = self.clock.tick_ms();
        let signals = SpikeSignals {
            stale_ms: self.arrival.stale_ms(now_ms),
            tick_ms,
            seq_gap: self.sequence.gap_detected(),
            arrival_impaired: self.arrival.impaired(now_ms),
        };
        if let Some(transition) = self.spike.evaluate(now_ms, &signals, &tuning) {
            self.on_spike_transition(now_ms, transition, tick_ms, &tuning);
        }

        let decision = self.playout.update(
            dt_secs,
            tick_ms,
            self.arrival.jitter_delay_ms(),
            self.spike.is_active(),
            &tuning,
        );
        let render_time = playout::render_time(now_ms, self.clock.offset_ms(), decision.delay_ms);
        self.last_render_time = Some(render_time);
        trace!(
            "Render at {:.1}ms: delay {:.1}ms (target {:.1}ms, boost {:.1}ms)",
            render_time,
            decision.delay_ms,
            decision.target_ms,
            self.playout.delay_boost_ms()
        );

        let sample = self
            .buffer
            .sample(render_time, decision.max_extrapolation_ms)?;
        self.stats.samples_served += 1;
        if sample.mode == SampleMode::Extrapolated {
            self.stats.samples_extrapolated += 1;
        }

        let mut snapshot = sample.snapshot;
        let context = StabilizerContext {
            spike: self.spike.state(),
            camera_hold: self.camera_hold,
            arrival_impaired: signals.arrival_impaired,
            delay_boost_ms: self.playout.delay_boost_ms(),
            tick_ms,
        };
        self.stabilizer
            .stabilize(&mut snapshot, self.local_entity, dt_secs, &context, &tuning);
        Some(snapshot)
    }

    fn on_spike_transition(
        &mut self,
        now_ms: f64,
        transition: SpikeTransition,
        tick_ms: f64,
        tuning: &Tuning,
    ) {
        let kind = match transition {
            SpikeTransition::Entered { cause } => {
                self.stats.spikes_entered += 1;
                self.playout.on_spike_entered(cause, tick_ms, tuning);
                info!(
                    "Lag spike entered ({}), boost {:.1}ms",
                    cause,
                    self.playout.delay_boost_ms()
                );
                SyncEventKind::SpikeEntered { cause }
            }
            SpikeTransition::CauseChanged { from, to } => {
                info!("Lag spike cause {} -> {}", from, to);
                SyncEventKind::SpikeCauseChanged { from, to }
            }
            SpikeTransition::Exited { cause, duration_ms } => {
                info!("Lag spike ({}) cleared after {:.0}ms", cause, duration_ms);
                SyncEventKind::SpikeExited { cause, duration_ms }
            }
        };
        self.emit(now_ms, kind);
    }

    /// Replace the tuning overrides with `raw` (normalized and clamped) and
    /// publish the resolved tuning. `announce` also emits a
    /// [`SyncEventKind::TuningChanged`] event.
    pub fn apply_tuning_overrides<I, K>(&mut self, raw: I, announce: bool) -> TuningUpdate
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let update = self.tuning.apply(TuningOverrides::normalize(raw));
        if announce {
            info!(
                "Tuning revision {} ({} overrides)",
                update.revision,
                update.overrides.len()
            );
            self.emit(
                self.last_now_ms,
                SyncEventKind::TuningChanged {
                    revision: update.revision,
                },
            );
        }
        update
    }

    /// Like [`Self::apply_tuning_overrides`], but rejects the whole set on
    /// the first unknown key or non-finite value and leaves tuning untouched.
    pub fn try_apply_tuning_overrides<I, K>(
        &mut self,
        raw: I,
        announce: bool,
    ) -> Result<TuningUpdate, TuningError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut overrides = TuningOverrides::new();
        let mut entries = Vec::new();
        for (name, value) in raw {
            overrides.try_set(name.as_ref(), value)?;
            entries.push((name, value));
        }
        Ok(self.apply_tuning_overrides(entries, announce))
    }

    /// Drop every override. Equivalent to applying an empty set.
    pub fn reset_tuning_overrides(&mut self) -> TuningUpdate {
        self.apply_tuning_overrides(std::iter::empty::<(&str, f64)>(), true)
    }

    /// Forget everything learned about the connection, e.g. on reconnect.
    /// Tuning, stats, and the event sink are kept.
    pub fn reset(&mut self) {
        info!("Resetting snapshot sync state");
        self.sequence.reset();
        self.clock.reset(self.config.default_tick_ms);
        self.arrival.reset();
        self.buffer.clear();
        self.spike.reset();
        self.playout.reset();
        self.stabilizer.clear();
        self.last_render_time = None;
    }

    /// Entity whose shape the stabilizer smooths.
    pub fn set_local_entity(&mut self, id: Option<EntityId>) {
        if self.local_entity != id {
            self.stabilizer.clear();
        }
        self.local_entity = id;
    }

    /// Tell the stabilizer the host camera is holding or recovering.
    pub fn set_camera_hold(&mut self, active: bool) {
        self.camera_hold = active;
    }

    fn emit(&mut self, at_ms: f64, kind: SyncEventKind) {
        let state = self.debug_state_at(at_ms);
        self.sink.emit(SyncEvent { at_ms, kind, state });
    }

    /// Copy of the current state, as of the last push or sample.
    pub fn debug_state(&self) -> SyncDebugState {
        self.debug_state_at(self.last_now_ms)
    }

    fn debug_state_at(&self, now_ms: f64) -> SyncDebugState {
        SyncDebugState {
            now_ms,
            clock_offset_ms: self.clock.offset_ms(),
            tick_ms: self.clock.tick_ms(),
            interval_ms: self.arrival.interval_ms().unwrap_or(self.clock.tick_ms()),
            jitter_ms: self.arrival.jitter_ms(),
            jitter_delay_ms: self.arrival.jitter_delay_ms(),
            stale_ms: self.arrival.stale_ms(now_ms),
            latest_seq: self.sequence.latest(),
            seq_gap_detected: self.sequence.gap_detected(),
            last_seq_gap: self.sequence.last_gap(),
            spike: self.spike.state(),
            arrival_impaired_until: self.arrival.impaired_until(),
            arrival_gap_cooldown_until: self.spike.arrival_gap_cooldown_until(),
            delay_boost_ms: self.playout.delay_boost_ms(),
            playout_delay_ms: self.playout.delay_ms(),
            target_delay_ms: self.playout.target_ms(),
            render_time: self.last_render_time,
            buffered: self.buffer.len(),
            tuning_revision: self.tuning.revision(),
        }
    }

    pub fn tuning(&self) -> Arc<Tuning> {
        self.tuning.shared()
    }

    pub fn tuning_overrides(&self) -> &TuningOverrides {
        self.tuning.overrides()
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn buffer(&self) -> &SnapshotBuffer<E> {
        &self.buffer
    }

    pub fn spike_state(&self) -> SpikeState {
        self.spike.state()
    }

    pub fn seq_gap_detected(&self) -> bool {
        self.sequence.gap_detected()
    }

    pub fn last_seq_gap(&self) -> u64 {
        self.sequence.last_gap()
    }

    pub fn latest_seq(&self) -> Option<u64> {
        self.sequence.latest()
    }

    pub fn clock_offset_ms(&self) -> f64 {
        self.clock.offset_ms()
    }

    pub fn tick_ms(&self) -> f64 {
        self.clock.tick_ms()
    }

    pub fn playout_delay_ms(&self) -> f64 {
        self.playout.delay_ms()
    }

    pub fn delay_boost_ms(&self) -> f64 {
        self.playout.delay_boost_ms()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
