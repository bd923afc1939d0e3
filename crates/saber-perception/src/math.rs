//! Rigid-body math primitives.
//!
//! Vectors, unit quaternions and rigid transforms in `f64`. Telemetry arrives
//! as `f32` degrees and is widened at the decode boundary so that smoothing
//! and distance measurements keep their precision near convergence.
//!
//! # Example
//!
//! ```rust
//! use saber_perception::math::{Quaternion, Vec3};
//!
//! let q = Quaternion::from_axis_angle(Vec3::unit_z(), std::f64::consts::FRAC_PI_2);
//! let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
//! assert!((r.y - 1.0).abs() < 1e-9);
//! ```

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector or point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn unit_x() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }

    pub fn unit_y() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    pub fn unit_z() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    /// Component-wise minimum.
    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    /// Component-wise maximum.
    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// Below this angular separation `slerp` falls back to normalised lerp.
const SLERP_EPSILON: f64 = 1e-6;

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle_rad` around the unit vector `axis`.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f64) -> Self {
        let (s, c) = (angle_rad * 0.5).sin_cos();
        Self::new(c, axis.x * s, axis.y * s, axis.z * s)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Rescale to unit length. A zero quaternion normalises to identity.
    pub fn normalize(self) -> Self {
        let n = self.norm();
        if n == 0.0 {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Spherical linear interpolation along the shortest arc.
    ///
    /// `t = 0` returns `self`, `t = 1` returns `target`; intermediate values
    /// move that fraction of the angular distance.
    pub fn slerp(self, target: Self, t: f64) -> Self {
        let mut cos_half = self.dot(target);
        // q and -q encode the same rotation; walk the short way round.
        let target = if cos_half < 0.0 {
            cos_half = -cos_half;
            Self::new(-target.w, -target.x, -target.y, -target.z)
        } else {
            target
        };

        if cos_half >= 1.0 {
            return self;
        }

        let half = cos_half.acos();
        let sin_half = half.sin();
        let (a, b) = if sin_half.abs() < SLERP_EPSILON {
            (1.0 - t, t)
        } else {
            (
                ((1.0 - t) * half).sin() / sin_half,
                (t * half).sin() / sin_half,
            )
        };

        Self::new(
            self.w * a + target.w * b,
            self.x * a + target.x * b,
            self.y * a + target.y * b,
            self.z * a + target.z * b,
        )
        .normalize()
    }

    /// Angle in radians of the rotation carrying `self` onto `other`.
    ///
    /// Uses `atan2` on the relative rotation so that small angles keep full
    /// precision.
    pub fn angle_to(self, other: Self) -> f64 {
        let rel = self.conjugate().mul(other);
        let vec_len = Vec3::new(rel.x, rel.y, rel.z).length();
        2.0 * vec_len.atan2(rel.w.abs())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// To convert a point expressed in the local frame into the parent frame,
/// rotate it by `rotation` then add `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quaternion::identity())
    }

    /// Map a local point into the parent frame.
    pub fn apply(self, p: Vec3) -> Vec3 {
        self.translation.add(self.rotation.rotate(p))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
