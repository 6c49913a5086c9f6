//! Snapshot arrival simulator for testing: packet loss, latency, jitter,
//! duplicates, reordering, and stalls.
//!
//! Produces a deterministic (seeded) schedule of `(arrival_ms, snapshot)`
//! pairs that can be replayed into a [`crate::SnapshotSync`].
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;
use crate::entity::SyncEntity;
use crate::interpolation::Snapshot;

/// Extra delay range for reordered packets, in ticks.
const REORDER_MAX_TICKS: f64 = 2.0;
/// Extra delay range for duplicated packets, in milliseconds.
const DUPLICATE_MAX_DELAY_MS: f64 = 20.0;

/// A snapshot and the local time it arrives.
#[derive(Debug, Clone)]
pub struct SimulatedArrival<E> {
    pub arrival_ms: f64,
    pub snapshot: Snapshot<E>,
}

/// Generates arrival schedules under configurable network conditions.
#[derive(Debug)]
pub struct ArrivalSimulator {
    config: SimulationConfig,
    rng: StdRng,
    next_seq: u64,
    next_tick: u64,
    dropped: u64,
}

impl ArrivalSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            next_seq: 1,
            next_tick: 0,
            dropped: 0,
        }
    }

    /// Generate `count` server ticks. Server time is `server_base_ms` plus
    /// the tick's local send time; `make` builds each snapshot's entities.
    /// The result is sorted by arrival time.
    pub fn schedule<E, F>(
        &mut self,
        count: usize,
        server_base_ms: f64,
        mut make: F,
    ) -> Vec<SimulatedArrival<E>>
    where
        E: SyncEntity,
        F: FnMut(u64, f64) -> Vec<E>,
    {
        let mut arrivals = Vec::with_capacity(count);

        for _ in 0..count {
            let seq = self.next_seq;
            let sent_at = self.next_tick as f64 * self.config.tick_ms;
            self.next_seq = self.next_seq.wrapping_add(1);
            self.next_tick += 1;

            if self.config.packet_loss > 0.0 && self.rng.random::<f32>() < self.config.packet_loss {
                self.dropped += 1;
                continue;
            }

            let server_time = server_base_ms + sent_at;
            let snapshot = Snapshot::new(seq, server_time, make(seq, server_time));

            let mut delay = self.config.latency_ms + self.random_up_to(self.config.jitter_ms);
            if self.config.out_of_order_chance > 0.0
                && self.rng.random::<f32>() < self.config.out_of_order_chance
            {
                delay += self.random_up_to(self.config.tick_ms * REORDER_MAX_TICKS);
            }

            if self.config.duplicate_chance > 0.0
                && self.rng.random::<f32>() < self.config.duplicate_chance
            {
                let dup_delay = delay + self.random_up_to(DUPLICATE_MAX_DELAY_MS);
                arrivals.push(SimulatedArrival {
                    arrival_ms: sent_at + dup_delay,
                    snapshot: snapshot.clone(),
                });
            }

            arrivals.push(SimulatedArrival {
                arrival_ms: sent_at + delay,
                snapshot,
            });
        }

        arrivals.sort_by(|a, b| a.arrival_ms.total_cmp(&b.arrival_ms));
        arrivals
    }

    fn random_up_to(&mut self, max: f64) -> f64 {
        if max > 0.0 {
            self.rng.random_range(0.0..max)
        } else {
            0.0
        }
    }

    /// Packets dropped by simulated loss so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Hold back every arrival in `[from_ms, from_ms + duration_ms)` and release
/// them together at the end of the stall.
pub fn apply_stall<E>(arrivals: &mut [SimulatedArrival<E>], from_ms: f64, duration_ms: f64) {
    let until = from_ms + duration_ms;
    for arrival in arrivals.iter_mut() {
        if arrival.arrival_ms >= from_ms && arrival.arrival_ms < until {
            arrival.arrival_ms = until;
        }
    }
    arrivals.sort_by(|a, b| a.arrival_ms.total_cmp(&b.arrival_ms));
}
