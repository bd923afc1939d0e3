//! Blade Collision Engine.
//!
//! Holds the static scene colliders and the blade geometry, and on every
//! tick answers "what did the blade just touch?".
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Aabb`]              | An axis-aligned bounding box in world space.            |
//! | [`SceneObject`]       | A box-shaped scene object: local extents + transform.   |
//! | [`BladeGeometry`]     | Fixed blade extents in the hilt's local frame.           |
//! | [`CollisionDetector`] | Collider arena, per-tick blade volume, hit response.     |
//!
//! Static collider volumes are computed once in
//! [`CollisionDetector::register_collider`] and never refreshed: if the scene
//! object moves afterwards, its collider keeps the registration-time box.
//!
//! # Example
//!
//! ```rust
//! use saber_perception::collision::{CollisionDetector, SceneObject, BladeGeometry};
//! use saber_perception::math::{Quaternion, Vec3};
//!
//! let mut detector = CollisionDetector::new(BladeGeometry::default());
//! let crate_id = detector.register_collider(
//!     &SceneObject::cuboid("crate", Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.1, 0.1, 0.1)),
//! );
//!
//! // Upright blade passes straight through the crate.
//! let hits = detector.tick(Quaternion::identity());
//! assert_eq!(hits, vec![crate_id]);
//! assert!(!detector.collider(crate_id).unwrap().visible);
//! ```

use tracing::{debug, info};

use crate::math::{Quaternion, Transform3D, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Box centred on `centre` with the given half extents.
    pub fn from_centre(centre: Vec3, half_extents: Vec3) -> Self {
        Self::new(centre.sub(half_extents), centre.add(half_extents))
    }

    /// Return the centre point of the box.
    pub fn centre(&self) -> Vec3 {
        Vec3::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }

    /// The eight corner points.
    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// World-space box enclosing this local box after `transform`.
    pub fn transformed(&self, transform: Transform3D) -> Self {
        let corners = self.corners();
        let first = transform.apply(corners[0]);
        let (min, max) = corners[1..]
            .iter()
            .map(|&c| transform.apply(c))
            .fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Self { min, max }
    }

    /// True when `other` overlaps (intersects or touches) this box.
    ///
    /// Holds iff `self.min ≤ other.max` and `other.min ≤ self.max` on every
    /// axis.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scene objects and colliders
// ────────────────────────────────────────────────────────────────────────────

/// A box-shaped scene object as seen at registration time.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    /// Geometry extents in the object's local frame.
    pub local_bounds: Aabb,
    /// Object-to-world transform.
    pub transform: Transform3D,
}

impl SceneObject {
    /// Axis-aligned cuboid centred at `centre` with `half_extents`.
    pub fn cuboid(name: impl Into<String>, centre: Vec3, half_extents: Vec3) -> Self {
        Self {
            name: name.into(),
            local_bounds: Aabb::from_centre(Vec3::zero(), half_extents),
            transform: Transform3D::from_translation(centre),
        }
    }

    /// Current world-space bounds of the geometry.
    pub fn world_bounds(&self) -> Aabb {
        self.local_bounds.transformed(self.transform)
    }
}

/// Stable handle into the collider arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderId(pub usize);

/// A registered static collider.
#[derive(Debug, Clone, PartialEq)]
pub struct Collider {
    /// World bounds captured at registration.
    pub bounds: Aabb,
    /// Cleared on the first hit; never set again.
    pub visible: bool,
    /// Name of the scene object this collider was built from.
    pub object: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Blade geometry
// ────────────────────────────────────────────────────────────────────────────

/// Fixed blade extents relative to the hilt.
///
/// The blade is a cylinder along the hilt's local +Y axis; its bounding box
/// is `radius` wide in X and Z, `length` tall, centred `offset` above the
/// hilt origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BladeGeometry {
    pub radius: f64,
    pub length: f64,
    pub offset: f64,
    /// World position of the hilt origin.
    pub anchor: Vec3,
}

impl Default for BladeGeometry {
    fn default() -> Self {
        Self {
            radius: 0.02,
            length: 1.2,
            offset: 0.75,
            anchor: Vec3::zero(),
        }
    }
}

impl BladeGeometry {
    /// Blade box in the hilt's local frame.
    pub fn local_bounds(&self) -> Aabb {
        Aabb::from_centre(
            Vec3::new(0.0, self.offset, 0.0),
            Vec3::new(self.radius, self.length * 0.5, self.radius),
        )
    }

    /// World-space blade box for the given hilt orientation.
    pub fn world_bounds(&self, orientation: Quaternion) -> Aabb {
        self.local_bounds()
            .transformed(Transform3D::new(self.anchor, orientation))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CollisionDetector
// ────────────────────────────────────────────────────────────────────────────

/// Static collider set plus the pose-driven blade volume.
///
/// Colliders live in an append-only arena addressed by [`ColliderId`].  A
/// hit hides the collider permanently; hidden colliders stay in the arena
/// and are still tested on later ticks, with no further effect.
#[derive(Debug, Default)]
pub struct CollisionDetector {
    blade: BladeGeometry,
    colliders: Vec<Collider>,
    blade_bounds: Option<Aabb>,
}

impl CollisionDetector {
    pub fn new(blade: BladeGeometry) -> Self {
        Self {
            blade,
            colliders: Vec::new(),
            blade_bounds: None,
        }
    }

    /// Snapshot `object`'s world bounds and store it as a visible collider.
    pub fn register_collider(&mut self, object: &SceneObject) -> ColliderId {
        let id = ColliderId(self.colliders.len());
        let bounds = object.world_bounds();
        debug!(collider = id.0, object = %object.name, ?bounds, "collider registered");
        self.colliders.push(Collider {
            bounds,
            visible: true,
            object: object.name.clone(),
        });
        id
    }

    pub fn collider(&self, id: ColliderId) -> Option<&Collider> {
        self.colliders.get(id.0)
    }

    pub fn colliders(&self) -> &[Collider] {
        &self.colliders
    }

    /// Number of colliders still visible.
    pub fn visible_count(&self) -> usize {
        self.colliders.iter().filter(|c| c.visible).count()
    }

    /// Blade volume computed by the most recent tick.
    pub fn blade_bounds(&self) -> Option<Aabb> {
        self.blade_bounds
    }

    pub fn blade(&self) -> &BladeGeometry {
        &self.blade
    }

    /// Recompute the blade volume from `orientation` and test every collider.
    ///
    /// Returns the colliders hidden by this tick.  An empty result is the
    /// normal outcome.
    pub fn tick(&mut self, orientation: Quaternion) -> Vec<ColliderId> {
        let blade = self.blade.world_bounds(orientation);
        self.blade_bounds = Some(blade);

        let mut hits = Vec::new();
        for (idx, collider) in self.colliders.iter_mut().enumerate() {
            if !blade.intersects(&collider.bounds) {
                continue;
            }
            if collider.visible {
                collider.visible = false;
                info!(collider = idx, object = %collider.object, "blade hit");
                hits.push(ColliderId(idx));
            }
        }
        hits
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn unit_box() -> Aabb {
        Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0))
    }

    // ── Aabb ────────────────────────────────────────────────────────────────

    #[test]
    fn aabb_normalises_corners() {
        let b = Aabb::new(Vec3::new(1.0, -1.0, 2.0), Vec3::new(-1.0, 1.0, 0.0));
        assert_eq!(b.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(b.max, Vec3::new(1.0, 1.0, 2.0));
    }

    #[test]
    fn aabb_centre_is_midpoint() {
        let c = unit_box().centre();
        assert_eq!(c, Vec3::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn overlapping_boxes_intersect() {
        let a = unit_box();
        let b = Aabb::new(Vec3::new(0.5, 0.5, 0.5), Vec3::new(2.0, 2.0, 2.0));
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
    }

    #[test]
    fn boxes_separated_on_one_axis_do_not_intersect() {
        let a = unit_box();
        // Overlaps on X and Y, separated on Z only.
        let b = Aabb::new(Vec3::new(0.2, 0.2, 1.5), Vec3::new(0.8, 0.8, 2.0));
        assert!(!a.intersects(&b));
        assert!(!b.intersects(&a));
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = unit_box();
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
    }

    #[test]
    fn intersects_matches_per_axis_rule() {
        let boxes = [
            unit_box(),
            Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(0.0, 0.0, 0.0)),
            Aabb::new(Vec3::new(3.0, 0.0, 0.0), Vec3::new(4.0, 1.0, 1.0)),
            Aabb::new(Vec3::new(0.5, -2.0, 0.5), Vec3::new(0.6, 5.0, 0.6)),
        ];
        for a in &boxes {
            for b in &boxes {
                let expected = a.min.x <= b.max.x
                    && a.min.y <= b.max.y
                    && a.min.z <= b.max.z
                    && b.min.x <= a.max.x
                    && b.min.y <= a.max.y
                    && b.min.z <= a.max.z;
                assert_eq!(a.intersects(b), expected, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn transformed_box_encloses_rotated_corners() {
        let local = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let q = Quaternion::from_axis_angle(Vec3::unit_z(), FRAC_PI_2);
        let world = local.transformed(Transform3D::new(Vec3::new(10.0, 0.0, 0.0), q));
        // X extent [0,2] maps onto Y, Y extent [0,1] maps onto -X.
        assert!((world.min.x - 9.0).abs() < 1e-9);
        assert!((world.max.x - 10.0).abs() < 1e-9);
        assert!((world.min.y - 0.0).abs() < 1e-9);
        assert!((world.max.y - 2.0).abs() < 1e-9);
    }

    // ── Blade ───────────────────────────────────────────────────────────────

    #[test]
    fn upright_blade_bounds() {
        let blade = BladeGeometry::default().world_bounds(Quaternion::identity());
        assert!((blade.min.y - 0.15).abs() < 1e-9);
        assert!((blade.max.y - 1.35).abs() < 1e-9);
        assert!((blade.max.x - 0.02).abs() < 1e-9);
    }

    #[test]
    fn tilted_blade_points_along_x() {
        // -90° about Z tips local +Y onto world +X.
        let q = Quaternion::from_axis_angle(Vec3::unit_z(), -FRAC_PI_2);
        let blade = BladeGeometry::default().world_bounds(q);
        assert!((blade.min.x - 0.15).abs() < 1e-9);
        assert!((blade.max.x - 1.35).abs() < 1e-9);
        assert!(blade.max.y.abs() < 0.03);
    }

    // ── CollisionDetector ───────────────────────────────────────────────────

    fn detector_with_targets() -> (CollisionDetector, ColliderId, ColliderId) {
        let mut d = CollisionDetector::new(BladeGeometry::default());
        let above = d.register_collider(&SceneObject::cuboid(
            "above",
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.1, 0.1, 0.1),
        ));
        let right = d.register_collider(&SceneObject::cuboid(
            "right",
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.1, 0.1, 0.1),
        ));
        (d, above, right)
    }

    #[test]
    fn registered_colliders_start_visible() {
        let (d, above, right) = detector_with_targets();
        assert!(d.collider(above).unwrap().visible);
        assert!(d.collider(right).unwrap().visible);
        assert_eq!(d.visible_count(), 2);
        assert!(d.blade_bounds().is_none());
    }

    #[test]
    fn tick_hides_only_touched_collider() {
        let (mut d, above, right) = detector_with_targets();
        let hits = d.tick(Quaternion::identity());
        assert_eq!(hits, vec![above]);
        assert!(!d.collider(above).unwrap().visible);
        assert!(d.collider(right).unwrap().visible);
        assert!(d.blade_bounds().is_some());
    }

    #[test]
    fn tick_without_contact_is_silent() {
        let mut d = CollisionDetector::new(BladeGeometry::default());
        d.register_collider(&SceneObject::cuboid(
            "far",
            Vec3::new(5.0, 5.0, 5.0),
            Vec3::new(0.1, 0.1, 0.1),
        ));
        assert!(d.tick(Quaternion::identity()).is_empty());
        assert_eq!(d.visible_count(), 1);
    }

    #[test]
    fn hidden_collider_stays_hidden_and_is_not_reported_again() {
        let (mut d, above, _) = detector_with_targets();
        assert_eq!(d.tick(Quaternion::identity()), vec![above]);
        assert!(d.tick(Quaternion::identity()).is_empty());
        assert!(!d.collider(above).unwrap().visible);
        assert_eq!(d.colliders().len(), 2);
    }

    #[test]
    fn swinging_blade_hits_second_target() {
        let (mut d, above, right) = detector_with_targets();
        d.tick(Quaternion::identity());
        let q = Quaternion::from_axis_angle(Vec3::unit_z(), -FRAC_PI_2);
        assert_eq!(d.tick(q), vec![right]);
        assert!(!d.collider(above).unwrap().visible);
        assert_eq!(d.visible_count(), 0);
    }

    #[test]
    fn collider_bounds_are_captured_at_registration() {
        let mut object =
            SceneObject::cuboid("mover", Vec3::new(5.0, 0.0, 0.0), Vec3::new(0.1, 0.1, 0.1));
        let mut d = CollisionDetector::new(BladeGeometry::default());
        let id = d.register_collider(&object);

        // Moving the object afterwards does not refresh its collider.
        object.transform = Transform3D::from_translation(Vec3::new(0.0, 1.0, 0.0));
        assert!(d.tick(Quaternion::identity()).is_empty());
        assert!(d.collider(id).unwrap().visible);
        assert!((d.collider(id).unwrap().bounds.centre().x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn anchor_offsets_blade() {
        let blade = BladeGeometry {
            anchor: Vec3::new(0.0, 0.0, -2.0),
            ..BladeGeometry::default()
        };
        let mut d = CollisionDetector::new(blade);
        let id = d.register_collider(&SceneObject::cuboid(
            "target",
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.1, 0.1, 0.1),
        ));
        assert!(d.tick(Quaternion::identity()).is_empty());
        assert!(d.collider(id).unwrap().visible);
    }
}
