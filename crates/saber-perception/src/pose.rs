//! Pose Reconstruction.
//!
//! Turns raw [`TelemetryFrame`]s into a jitter-reduced orientation.
//!
//! Each frame is mapped to a *target* orientation by an intrinsic Euler
//! composition in **Y, X, Z** order:
//!
//! ```text
//! target = q_Y(beta) · q_X(alpha) · q_Z(gamma)
//! ```
//!
//! and the running orientation is blended toward it once per received frame:
//!
//! ```text
//! current = slerp(current, target, 0.2)
//! ```
//!
//! # Example
//!
//! ```rust
//! use saber_perception::pose::PoseReconstructor;
//! use saber_types::TelemetryFrame;
//!
//! let mut pose = PoseReconstructor::new();
//! let frame = TelemetryFrame::new(10.0, 20.0, 5.0);
//! pose.apply_bytes(&frame.encode()).unwrap();
//! assert_eq!(pose.frames_applied(), 1);
//!
//! // Wrong-sized payloads are rejected and leave the pose untouched.
//! let before = pose.current();
//! assert!(pose.apply_bytes(&[0u8; 7]).is_err());
//! assert_eq!(pose.current(), before);
//! ```

use saber_types::{SaberError, TelemetryFrame};
use tracing::warn;

use crate::math::{Quaternion, Vec3};

/// Fraction of the angular distance covered per received frame.
pub const SMOOTHING_FACTOR: f64 = 0.2;

/// Build the target orientation for a frame.
///
/// `beta` drives the Y rotation, `alpha` the X rotation and `gamma` the Z
/// rotation; the order of composition is load-bearing.
pub fn orientation_from_frame(frame: &TelemetryFrame) -> Quaternion {
    let alpha = f64::from(frame.alpha).to_radians();
    let beta = f64::from(frame.beta).to_radians();
    let gamma = f64::from(frame.gamma).to_radians();

    Quaternion::from_axis_angle(Vec3::unit_y(), beta)
        .mul(Quaternion::from_axis_angle(Vec3::unit_x(), alpha))
        .mul(Quaternion::from_axis_angle(Vec3::unit_z(), gamma))
        .normalize()
}

/// Running smoothed orientation fed by telemetry frames.
#[derive(Debug, Clone)]
pub struct PoseReconstructor {
    current: Quaternion,
    last_target: Option<Quaternion>,
    factor: f64,
    frames_applied: u64,
    frames_rejected: u64,
}

impl Default for PoseReconstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseReconstructor {
    /// Start at the identity orientation with the standard smoothing factor.
    pub fn new() -> Self {
        Self::with_factor(SMOOTHING_FACTOR)
    }

    /// Use a custom smoothing factor, clamped to `[0, 1]`.
    pub fn with_factor(factor: f64) -> Self {
        Self {
            current: Quaternion::identity(),
            last_target: None,
            factor: factor.clamp(0.0, 1.0),
            frames_applied: 0,
            frames_rejected: 0,
        }
    }

    /// Current smoothed orientation.
    pub fn current(&self) -> Quaternion {
        self.current
    }

    /// Orientation implied by the most recent valid frame, if any.
    pub fn last_target(&self) -> Option<Quaternion> {
        self.last_target
    }

    pub fn frames_applied(&self) -> u64 {
        self.frames_applied
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Blend one decoded frame into the smoothed orientation.
    pub fn apply(&mut self, frame: &TelemetryFrame) -> Quaternion {
        let target = orientation_from_frame(frame);
        self.current = self.current.slerp(target, self.factor);
        self.last_target = Some(target);
        self.frames_applied += 1;
        self.current
    }

    /// Decode a wire payload and blend it in.
    ///
    /// # Errors
    ///
    /// Returns [`SaberError::MalformedFrame`] for payloads that are not 12
    /// bytes long and [`SaberError::NonFiniteFrame`] for NaN or infinite
    /// angles.  The smoothed orientation is left unchanged in both cases.
    pub fn apply_bytes(&mut self, payload: &[u8]) -> Result<Quaternion, SaberError> {
        match TelemetryFrame::decode(payload) {
            Ok(frame) => Ok(self.apply(&frame)),
            Err(e) => {
                self.frames_rejected += 1;
                warn!(len = payload.len(), error = %e, "dropping malformed telemetry frame");
                Err(e)
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
