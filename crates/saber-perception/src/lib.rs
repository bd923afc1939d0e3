//! `saber-perception` – Pose & Contact layer.
//!
//! Turns the raw orientation stream into something a renderer can draw and
//! a scene can react to.
//!
//! # Modules
//!
//! - [`math`] – [`Vec3`][math::Vec3], [`Quaternion`][math::Quaternion] and
//!   [`Transform3D`][math::Transform3D] primitives, including shortest-arc
//!   slerp.
//! - [`pose`] – [`PoseReconstructor`][pose::PoseReconstructor]: maps each
//!   telemetry frame to a target orientation (Y·X·Z Euler composition) and
//!   blends it into a smoothed orientation.
//! - [`collision`] – [`CollisionDetector`][collision::CollisionDetector]:
//!   recomputes the blade's bounding box from the smoothed orientation every
//!   tick and hides any static collider it touches.

pub mod collision;
pub mod math;
pub mod pose;

pub use collision::{Aabb, BladeGeometry, Collider, ColliderId, CollisionDetector, SceneObject};
pub use math::{Quaternion, Transform3D, Vec3};
pub use pose::{PoseReconstructor, SMOOTHING_FACTOR, orientation_from_frame};
