//! Entity-level hooks the sync core needs from game payloads.
//!
//! The core never looks inside an entity beyond its id, liveness, and the
//! shape points the stabilizer blends. Interpolation math lives behind
//! [`SyncEntity::lerp`], so circular coordinate spaces or angular fields can
//! wrap however the game needs.

/// Identifier of a replicated entity.
pub type EntityId = u32;

/// A point of an entity's shape in world space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const ZERO: Point3 = Point3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Linear blend toward `other`. `t` outside `[0, 1]` extrapolates.
    pub fn lerp(self, other: Point3, t: f32) -> Point3 {
        Point3 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    pub fn distance(self, other: Point3) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Trait for entity payloads carried by snapshots.
pub trait SyncEntity: Clone {
    fn id(&self) -> EntityId;

    /// Blend between `self` (older) and `other` (newer) by `t`.
    ///
    /// `t` is in `[0, 1]` when interpolating between two snapshots and above 1
    /// when extrapolating past the newest one, so implementations should
    /// extend the `self -> other` motion linearly rather than clamp.
    fn lerp(&self, other: &Self, t: f32) -> Self;

    /// Shape points, head first. Empty for entities without a body.
    fn shape(&self) -> &[Point3];

    /// Replace the shape points. Called only for the locally controlled entity.
    fn set_shape(&mut self, points: &[Point3]);

    fn is_alive(&self) -> bool {
        true
    }
}
