//! Snapshot buffering and render-time sampling.
//!
//! [`SnapshotBuffer`] keeps received snapshots ordered by server time and
//! produces a view of the world at an arbitrary render time: interpolated
//! between the two bracketing snapshots, or extrapolated a bounded distance
//! past the newest one. Per-entity math is delegated to [`SyncEntity::lerp`].

use std::collections::{HashMap, VecDeque};

use crate::entity::{EntityId, SyncEntity};

/// One authoritative world-state message from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<E> {
    pub seq: u64,
    /// Server clock, in milliseconds.
    pub server_time: f64,
    pub entities: Vec<E>,
}

impl<E: SyncEntity> Snapshot<E> {
    pub fn new(seq: u64, server_time: f64, entities: Vec<E>) -> Self {
        Self {
            seq,
            server_time,
            entities,
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&E> {
        self.entities.iter().find(|e| e.id() == id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut E> {
        self.entities.iter_mut().find(|e| e.id() == id)
    }
}

/// A snapshot plus the local time it arrived.
#[derive(Debug, Clone)]
pub struct TimedSnapshot<E> {
    pub snapshot: Snapshot<E>,
    pub received_at: f64,
}

/// How a sample was produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleMode {
    /// Blended between two snapshots.
    Interpolated,
    /// Projected past the newest snapshot.
    Extrapolated,
    /// A buffered snapshot returned as-is (single entry, render time at or
    /// before the oldest, or extrapolation disabled).
    Held,
}

/// Result of [`SnapshotBuffer::sample`].
#[derive(Debug, Clone)]
pub struct BufferSample<E> {
    pub snapshot: Snapshot<E>,
    pub mode: SampleMode,
    /// Blend factor applied from the older to the newer snapshot.
    pub t: f32,
}

/// Capacity-bounded buffer of snapshots sorted by server time.
#[derive(Debug)]
pub struct SnapshotBuffer<E> {
    snapshots: VecDeque<TimedSnapshot<E>>,
    capacity: usize,
}

impl<E: SyncEntity> SnapshotBuffer<E> {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Insert a snapshot in server-time order, evicting the oldest beyond
    /// capacity. Returns `false` if the server time is not finite or a
    /// snapshot with the same `seq` is already buffered.
    pub fn push(&mut self, snapshot: Snapshot<E>, received_at: f64) -> bool {
        if !snapshot.server_time.is_finite()
            || self.snapshots.iter().any(|s| s.snapshot.seq == snapshot.seq)
        {
            return false;
        }

        let index = self
            .snapshots
            .partition_point(|s| s.snapshot.server_time <= snapshot.server_time);
        self.snapshots.insert(
            index,
            TimedSnapshot {
                snapshot,
                received_at,
            },
        );

        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
        true
    }

    /// Sample the world at `render_time` (server clock, ms). Returns `None`
    /// only when nothing has been buffered.
    pub fn sample(&self, render_time: f64, max_extrapolation_ms: f64) -> Option<BufferSample<E>> {
        let newest = self.snapshots.back()?;
        let oldest = self.snapshots.front()?;

        if self.snapshots.len() == 1 || render_time <= oldest.snapshot.server_time {
            let held = if render_time <= oldest.snapshot.server_time {
                oldest
            } else {
                newest
            };
            return Some(BufferSample {
                snapshot: held.snapshot.clone(),
                mode: SampleMode::Held,
                t: 0.0,
            });
        }

        if render_time >= newest.snapshot.server_time {
            let prev = &self.snapshots[self.snapshots.len() - 2].snapshot;
            return Some(Self::extrapolate(
                prev,
                &newest.snapshot,
                render_time,
                max_extrapolation_ms,
            ));
        }

        // Find the two snapshots that bracket render_time
        for i in 0..self.snapshots.len() - 1 {
            let a = &self.snapshots[i].snapshot;
            let b = &self.snapshots[i + 1].snapshot;
            if render_time >= a.server_time && render_time < b.server_time {
                let duration = b.server_time - a.server_time;
                let t = ((render_time - a.server_time) / duration).clamp(0.0, 1.0) as f32;
                return Some(BufferSample {
                    snapshot: Snapshot {
                        seq: a.seq,
                        server_time: render_time,
                        entities: blend_entities(a, b, t),
                    },
                    mode: SampleMode::Interpolated,
                    t,
                });
            }
        }

        Some(BufferSample {
            snapshot: newest.snapshot.clone(),
            mode: SampleMode::Held,
            t: 0.0,
        })
    }

    fn extrapolate(
        prev: &Snapshot<E>,
        newest: &Snapshot<E>,
        render_time: f64,
        max_extrapolation_ms: f64,
    ) -> BufferSample<E> {
        let span = newest.server_time - prev.server_time;
        let ahead = (render_time - newest.server_time).min(max_extrapolation_ms.max(0.0));
        if span <= 0.0 || ahead <= 0.0 {
            return BufferSample {
                snapshot: newest.clone(),
                mode: SampleMode::Held,
                t: 1.0,
            };
        }

        let t = (1.0 + ahead / span) as f32;
        BufferSample {
            snapshot: Snapshot {
                seq: newest.seq,
                server_time: newest.server_time + ahead,
                entities: blend_entities(prev, newest, t),
            },
            mode: SampleMode::Extrapolated,
            t,
        }
    }

    pub fn newest(&self) -> Option<&TimedSnapshot<E>> {
        self.snapshots.back()
    }

    pub fn oldest(&self) -> Option<&TimedSnapshot<E>> {
        self.snapshots.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedSnapshot<E>> {
        self.snapshots.iter()
    }

    /// Number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear all buffered snapshots.
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

/// Entities in both snapshots are blended; entities only in `to` are taken
/// as-is; entities only in `from` have despawned and are dropped.
fn blend_entities<E: SyncEntity>(from: &Snapshot<E>, to: &Snapshot<E>, t: f32) -> Vec<E> {
    let previous: HashMap<EntityId, &E> = from.entities.iter().map(|e| (e.id(), e)).collect();
    to.entities
        .iter()
        .map(|e| match previous.get(&e.id()) {
            Some(old) => old.lerp(e, t),
            None => e.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Point3;

    #[derive(Debug, Clone, PartialEq)]
    struct Dot {
        id: EntityId,
        pos: [Point3; 1],
    }

    impl Dot {
        fn at(id: EntityId, x: f32) -> Self {
            Self {
                id,
                pos: [Point3::new(x, 0.0, 0.0)],
            }
        }

        fn x(&self) -> f32 {
            self.pos[0].x
        }
    }

    impl SyncEntity for Dot {
        fn id(&self) -> EntityId {
            self.id
        }
        fn lerp(&self, other: &Self, t: f32) -> Self {
            Self {
                id: self.id,
                pos: [self.pos[0].lerp(other.pos[0], t)],
            }
        }
        fn shape(&self) -> &[Point3] {
            &self.pos
        }
        fn set_shape(&mut self, points: &[Point3]) {
            if let Some(p) = points.first() {
                self.pos[0] = *p;
            }
        }
    }

    fn snap(seq: u64, time: f64, x: f32) -> Snapshot<Dot> {
        Snapshot::new(seq, time, vec![Dot::at(1, x)])
    }

    #[test]
    fn test_empty_buffer_samples_none() {
        let buffer: SnapshotBuffer<Dot> = SnapshotBuffer::new(8);
        assert!(buffer.sample(100.0, 50.0).is_none());
    }

    #[test]
    fn test_single_snapshot_is_held() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.push(snap(1, 1000.0, 5.0), 0.0);
        let sample = buffer.sample(2000.0, 50.0).unwrap();
        assert_eq!(sample.mode, SampleMode::Held);
        assert_eq!(sample.snapshot.seq, 1);
    }

    #[test]
    fn test_interpolation_midpoint() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.push(snap(1, 1000.0, 0.0), 0.0);
        buffer.push(snap(2, 1100.0, 10.0), 100.0);

        let sample = buffer.sample(1050.0, 50.0).unwrap();
        assert_eq!(sample.mode, SampleMode::Interpolated);
        assert_eq!(sample.snapshot.seq, 1);
        assert!((sample.snapshot.entities[0].x() - 5.0).abs() < 1e-4);
        assert!((sample.t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_before_oldest_holds_oldest() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.push(snap(1, 1000.0, 0.0), 0.0);
        buffer.push(snap(2, 1100.0, 10.0), 100.0);
        let sample = buffer.sample(900.0, 50.0).unwrap();
        assert_eq!(sample.mode, SampleMode::Held);
        assert_eq!(sample.snapshot.seq, 1);
    }

    #[test]
    fn test_extrapolation_is_clamped() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.push(snap(1, 1000.0, 0.0), 0.0);
        buffer.push(snap(2, 1100.0, 10.0), 100.0);

        let sample = buffer.sample(1150.0, 200.0).unwrap();
        assert_eq!(sample.mode, SampleMode::Extrapolated);
        assert!((sample.snapshot.entities[0].x() - 15.0).abs() < 1e-4);

        let sample = buffer.sample(1500.0, 20.0).unwrap();
        assert_eq!(sample.snapshot.server_time, 1120.0);
        assert!((sample.snapshot.entities[0].x() - 12.0).abs() < 1e-4);

        let sample = buffer.sample(1500.0, 0.0).unwrap();
        assert_eq!(sample.mode, SampleMode::Held);
        assert_eq!(sample.snapshot.entities[0].x(), 10.0);
    }

    #[test]
    fn test_push_keeps_order_and_capacity() {
        let mut buffer = SnapshotBuffer::new(4);
        for (seq, time) in [(1, 1000.0), (3, 1066.0), (2, 1033.0), (5, 1132.0), (4, 1099.0), (6, 1165.0)] {
            buffer.push(snap(seq, time, 0.0), 0.0);
            assert!(buffer.len() <= 4);
        }
        let times: Vec<f64> = buffer.iter().map(|s| s.snapshot.server_time).collect();
        assert_eq!(times, vec![1066.0, 1099.0, 1132.0, 1165.0]);
    }

    #[test]
    fn test_non_finite_server_time_not_buffered() {
        let mut buffer = SnapshotBuffer::new(4);
        buffer.push(snap(1, 1000.0, 0.0), 0.0);
        assert!(!buffer.push(snap(2, f64::NAN, 5.0), 10.0));
        assert!(!buffer.push(snap(3, f64::INFINITY, 5.0), 20.0));
        buffer.push(snap(4, 1100.0, 10.0), 30.0);
        let times: Vec<f64> = buffer.iter().map(|s| s.snapshot.server_time).collect();
        assert_eq!(times, vec![1000.0, 1100.0]);
    }

    #[test]
    fn test_duplicate_seq_not_buffered() {
        let mut buffer = SnapshotBuffer::new(4);
        assert!(buffer.push(snap(1, 1000.0, 0.0), 0.0));
        assert!(!buffer.push(snap(1, 1000.0, 3.0), 5.0));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_entities_matched_by_id() {
        let mut buffer = SnapshotBuffer::new(4);
        buffer.push(Snapshot::new(1, 0.0, vec![Dot::at(1, 0.0), Dot::at(2, 0.0)]), 0.0);
        buffer.push(Snapshot::new(2, 100.0, vec![Dot::at(3, 7.0), Dot::at(1, 10.0)]), 100.0);

        let sample = buffer.sample(50.0, 0.0).unwrap();
        let ids: Vec<EntityId> = sample.snapshot.entities.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(sample.snapshot.entity(3).unwrap().x(), 7.0);
        assert!((sample.snapshot.entity(1).unwrap().x() - 5.0).abs() < 1e-4);
    }
}
