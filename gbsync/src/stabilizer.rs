//! Display smoothing for the locally controlled entity.
//!
//! Corrections to the player's own body are the most visible artifact of a
//! degraded connection. Each frame the displayed shape is blended from what
//! was drawn last toward the freshly sampled shape with
//! `alpha = 1 - e^(-rate * dt)`. The rate drops as conditions worsen. Points
//! are biased by index: the head (index 0) gets plain `alpha`, and points
//! further along get `alpha + (1 - alpha) * (i / (n - 1))^2`, so the tail
//! tracks the authoritative position while head jumps are absorbed.
use smallvec::SmallVec;

use crate::entity::{EntityId, Point3, SyncEntity};
use crate::interpolation::Snapshot;
use crate::spike::{LagSpikeCause, SpikeState};
use crate::tuning::Tuning;
use crate::util::smoothing_alpha;

/// Network conditions the stabilizer picks its rate from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizerContext {
    pub spike: SpikeState,
    /// Host camera is holding or recovering from a hold.
    pub camera_hold: bool,
    pub arrival_impaired: bool,
    pub delay_boost_ms: f64,
    pub tick_ms: f64,
}

/// Damping tier, slowest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizerTier {
    Calm,
    MildArrivalSpike,
    NearSpike,
}

impl StabilizerContext {
    pub fn tier(&self, tuning: &Tuning) -> StabilizerTier {
        let hard_spike = match self.spike {
            SpikeState::Active { cause, .. } => cause != LagSpikeCause::ArrivalGap,
            SpikeState::Inactive => false,
        };
        let heavy_boost = self.delay_boost_ms > self.tick_ms * tuning.stabilizer_boost_tick_fraction;
        if hard_spike || self.camera_hold || heavy_boost {
            StabilizerTier::NearSpike
        } else if self.arrival_impaired || self.spike.cause() == LagSpikeCause::ArrivalGap {
            StabilizerTier::MildArrivalSpike
        } else {
            StabilizerTier::Calm
        }
    }

    fn rate(&self, tuning: &Tuning) -> f64 {
        match self.tier(tuning) {
            StabilizerTier::Calm => tuning.stabilizer_rate,
            StabilizerTier::MildArrivalSpike => tuning.stabilizer_mild_rate,
            StabilizerTier::NearSpike => tuning.stabilizer_spike_rate,
        }
    }
}

/// Remembers the local entity's last displayed shape.
#[derive(Debug, Default)]
pub struct LocalEntityStabilizer {
    entity: Option<EntityId>,
    displayed: SmallVec<[Point3; 64]>,
}

impl LocalEntityStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the local entity's shape in `snapshot` with the stabilized one.
    /// Every other entity is left untouched. Returns the tier used, or `None`
    /// when the snapshot passed through unchanged.
    pub fn stabilize<E: SyncEntity>(
        &mut self,
        snapshot: &mut Snapshot<E>,
        local: Option<EntityId>,
        dt_secs: f64,
        context: &StabilizerContext,
        tuning: &Tuning,
    ) -> Option<StabilizerTier> {
        let Some(entity) = local.and_then(|id| snapshot.entity_mut(id)) else {
            self.clear();
            return None;
        };
        if !entity.is_alive() || entity.shape().is_empty() {
            self.clear();
            return None;
        }

        let target = entity.shape();
        if self.entity != local || self.displayed.is_empty() {
            self.entity = local;
            self.displayed = SmallVec::from_slice(target);
            return Some(context.tier(tuning));
        }

        let tier = context.tier(tuning);
        let alpha = smoothing_alpha(context.rate(tuning), dt_secs);
        blend_shape(&mut self.displayed, target, alpha);
        entity.set_shape(&self.displayed);
        Some(tier)
    }

    /// Shape drawn last frame, empty when nothing is tracked.
    pub fn displayed(&self) -> &[Point3] {
        &self.displayed
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub fn clear(&mut self) {
        self.entity = None;
        self.displayed.clear();
    }
}

/// Blend `displayed` toward `target` in place, resizing it to match.
fn blend_shape(displayed: &mut SmallVec<[Point3; 64]>, target: &[Point3], alpha: f64) {
    let n = target.len();
    displayed.truncate(n);
    let overlap = displayed.len();

    if alpha > 0.0 {
        for (i, (shown, &goal)) in displayed.iter_mut().zip(target).enumerate() {
            let reach = if n > 1 {
                let w = i as f64 / (n - 1) as f64;
                w * w
            } else {
                0.0
            };
            let a = alpha + (1.0 - alpha) * reach;
            *shown = shown.lerp(goal, a as f32);
        }
    }

    // Newly grown points have no history to blend from
    displayed.extend_from_slice(&target[overlap..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Body {
        id: EntityId,
        alive: bool,
        points: Vec<Point3>,
    }

    impl SyncEntity for Body {
        fn id(&self) -> EntityId {
            self.id
        }
        fn lerp(&self, other: &Self, t: f32) -> Self {
            Self {
                id: other.id,
                alive: other.alive,
                points: self
                    .points
                    .iter()
                    .zip(&other.points)
                    .map(|(a, b)| a.lerp(*b, t))
                    .collect(),
            }
        }
        fn shape(&self) -> &[Point3] {
            &self.points
        }
        fn set_shape(&mut self, points: &[Point3]) {
            self.points = points.to_vec();
        }
        fn is_alive(&self) -> bool {
            self.alive
        }
    }

    fn body(id: EntityId, x: f32, len: usize) -> Body {
        Body {
            id,
            alive: true,
            points: (0..len).map(|i| Point3::new(x - i as f32, 0.0, 0.0)).collect(),
        }
    }

    fn world(local_x: f32, len: usize) -> Snapshot<Body> {
        Snapshot::new(1, 0.0, vec![body(1, local_x, len), body(2, 50.0, 3)])
    }

    fn calm() -> StabilizerContext {
        StabilizerContext {
            spike: SpikeState::Inactive,
            camera_hold: false,
            arrival_impaired: false,
            delay_boost_ms: 0.0,
            tick_ms: 33.0,
        }
    }

    #[test]
    fn test_tiers() {
        let tuning = Tuning::default();
        assert_eq!(calm().tier(&tuning), StabilizerTier::Calm);

        let mild = StabilizerContext {
            arrival_impaired: true,
            ..calm()
        };
        assert_eq!(mild.tier(&tuning), StabilizerTier::MildArrivalSpike);

        let arrival_spike = StabilizerContext {
            spike: SpikeState::Active {
                cause: LagSpikeCause::ArrivalGap,
                since_ms: 0.0,
            },
            ..calm()
        };
        assert_eq!(arrival_spike.tier(&tuning), StabilizerTier::MildArrivalSpike);

        let hard = StabilizerContext {
            spike: SpikeState::Active {
                cause: LagSpikeCause::SeqGap,
                since_ms: 0.0,
            },
            ..calm()
        };
        assert_eq!(hard.tier(&tuning), StabilizerTier::NearSpike);

        let held = StabilizerContext {
            camera_hold: true,
            ..calm()
        };
        assert_eq!(held.tier(&tuning), StabilizerTier::NearSpike);

        let boosted = StabilizerContext {
            delay_boost_ms: 30.0,
            arrival_impaired: true,
            ..calm()
        };
        assert_eq!(boosted.tier(&tuning), StabilizerTier::NearSpike);
    }

    #[test]
    fn test_missing_local_entity_passes_through() {
        let tuning = Tuning::default();
        let mut stabilizer = LocalEntityStabilizer::new();
        let mut snapshot = world(0.0, 4);
        stabilizer.stabilize(&mut snapshot, Some(1), 0.016, &calm(), &tuning);
        assert_eq!(stabilizer.entity(), Some(1));

        let mut other = world(10.0, 4);
        let original = other.clone();
        assert_eq!(
            stabilizer.stabilize(&mut other, Some(9), 0.016, &calm(), &tuning),
            None
        );
        assert_eq!(other, original);
        assert!(stabilizer.displayed().is_empty());
    }

    #[test]
    fn test_dead_entity_clears_state() {
        let tuning = Tuning::default();
        let mut stabilizer = LocalEntityStabilizer::new();
        let mut snapshot = world(0.0, 4);
        stabilizer.stabilize(&mut snapshot, Some(1), 0.016, &calm(), &tuning);

        let mut dead = world(5.0, 4);
        dead.entities[0].alive = false;
        let original = dead.clone();
        assert_eq!(
            stabilizer.stabilize(&mut dead, Some(1), 0.016, &calm(), &tuning),
            None
        );
        assert_eq!(dead, original);
        assert_eq!(stabilizer.entity(), None);
    }

    #[test]
    fn test_instant_convergence_with_large_alpha() {
        let tuning = Tuning::default();
        let mut stabilizer = LocalEntityStabilizer::new();
        stabilizer.stabilize(&mut world(0.0, 5), Some(1), 0.016, &calm(), &tuning);

        let mut next = world(20.0, 5);
        let target = next.entities[0].points.clone();
        // rate * dt large enough that alpha rounds to 1
        stabilizer.stabilize(&mut next, Some(1), 100.0, &calm(), &tuning);
        assert_eq!(next.entities[0].points, target);
    }

    #[test]
    fn test_zero_rate_freezes_shape() {
        let mut tuning = Tuning::default();
        tuning.stabilizer_rate = 0.0;
        let mut stabilizer = LocalEntityStabilizer::new();
        let mut first = world(0.0, 5);
        stabilizer.stabilize(&mut first, Some(1), 0.016, &calm(), &tuning);
        let shown = first.entities[0].points.clone();

        for step in 1..10 {
            let mut next = world(step as f32 * 3.0, 5);
            stabilizer.stabilize(&mut next, Some(1), 0.016, &calm(), &tuning);
            assert_eq!(next.entities[0].points, shown);
        }
    }

    #[test]
    fn test_tail_snaps_head_damped() {
        let tuning = Tuning::default();
        let mut stabilizer = LocalEntityStabilizer::new();
        stabilizer.stabilize(&mut world(0.0, 5), Some(1), 0.016, &calm(), &tuning);

        let mut next = world(10.0, 5);
        let target = next.entities[0].points.clone();
        stabilizer.stabilize(&mut next, Some(1), 0.016, &calm(), &tuning);
        let shown = &next.entities[0].points;

        let head_error = shown[0].distance(target[0]);
        let tail_error = shown[4].distance(target[4]);
        assert!(head_error > 1.0, "head should lag, error {}", head_error);
        assert!(tail_error < 1e-4, "tail should snap, error {}", tail_error);
        for i in 1..5 {
            assert!(shown[i].distance(target[i]) <= shown[i - 1].distance(target[i - 1]));
        }
    }

    #[test]
    fn test_other_entities_untouched() {
        let tuning = Tuning::default();
        let mut stabilizer = LocalEntityStabilizer::new();
        stabilizer.stabilize(&mut world(0.0, 3), Some(1), 0.016, &calm(), &tuning);
        let mut next = world(10.0, 3);
        let other = next.entities[1].clone();
        stabilizer.stabilize(&mut next, Some(1), 0.016, &calm(), &tuning);
        assert_eq!(next.entities[1], other);
    }

    #[test]
    fn test_growth_takes_new_points_directly() {
        let tuning = Tuning::default();
        let mut stabilizer = LocalEntityStabilizer::new();
        stabilizer.stabilize(&mut world(0.0, 3), Some(1), 0.016, &calm(), &tuning);
        let mut grown = world(0.0, 5);
        let target = grown.entities[0].points.clone();
        stabilizer.stabilize(&mut grown, Some(1), 0.016, &calm(), &tuning);
        assert_eq!(grown.entities[0].points.len(), 5);
        assert_eq!(grown.entities[0].points[3], target[3]);
        assert_eq!(grown.entities[0].points[4], target[4]);
    }

    #[test]
    fn test_slower_tier_lags_more() {
        let tuning = Tuning::default();
        let hard = StabilizerContext {
            camera_hold: true,
            ..calm()
        };
        let mut fast = LocalEntityStabilizer::new();
        let mut slow = LocalEntityStabilizer::new();
        fast.stabilize(&mut world(0.0, 3), Some(1), 0.016, &calm(), &tuning);
        slow.stabilize(&mut world(0.0, 3), Some(1), 0.016, &hard, &tuning);

        let mut a = world(10.0, 3);
        let mut b = world(10.0, 3);
        fast.stabilize(&mut a, Some(1), 0.016, &calm(), &tuning);
        slow.stabilize(&mut b, Some(1), 0.016, &hard, &tuning);
        assert!(b.entities[0].points[0].x < a.entities[0].points[0].x);
    }
}
