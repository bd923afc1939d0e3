use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Size in bytes of one encoded [`TelemetryFrame`] on the wire.
pub const FRAME_LEN: usize = 12;

/// One orientation sample as produced by the sensor client.
///
/// Angles are in degrees and follow the device-orientation naming used by
/// handheld sensors: `alpha`, `beta`, `gamma`.
///
/// Wire layout: three little-endian IEEE-754 `f32` values, 12 bytes total,
/// no header and no length prefix. The transport provides message framing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl TelemetryFrame {
    pub fn new(alpha: f32, beta: f32, gamma: f32) -> Self {
        Self { alpha, beta, gamma }
    }

    /// True when all three angles are finite.
    pub fn is_finite(&self) -> bool {
        self.alpha.is_finite() && self.beta.is_finite() && self.gamma.is_finite()
    }

    /// Encode into the 12-byte wire representation.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0..4].copy_from_slice(&self.alpha.to_le_bytes());
        out[4..8].copy_from_slice(&self.beta.to_le_bytes());
        out[8..12].copy_from_slice(&self.gamma.to_le_bytes());
        out
    }

    /// Decode a wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`SaberError::MalformedFrame`] when `bytes` is not exactly
    /// [`FRAME_LEN`] bytes long, and [`SaberError::NonFiniteFrame`] when any
    /// angle is NaN or infinite.
    pub fn decode(bytes: &[u8]) -> Result<Self, SaberError> {
        let raw: &[u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| SaberError::MalformedFrame { len: bytes.len() })?;
        let word = |i: usize| f32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        let frame = Self::new(word(0), word(4), word(8));
        if !frame.is_finite() {
            return Err(SaberError::NonFiniteFrame);
        }
        Ok(frame)
    }
}

/// Opaque identity of one relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a client-side connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// Error type shared by every saber crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SaberError {
    #[error("Malformed telemetry frame: expected {FRAME_LEN} bytes, got {len}")]
    MalformedFrame { len: usize },

    #[error("Malformed telemetry frame: angles must be finite")]
    NonFiniteFrame,

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Bind Error on {addr}: {details}")]
    Bind { addr: String, details: String },

    #[error("TLS Error: {0}")]
    Tls(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Send Failed: {0}")]
    SendFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_encodes_little_endian() {
        let frame = TelemetryFrame::new(1.0, -2.5, 90.0);
        let bytes = frame.encode();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-2.5f32).to_le_bytes());
        assert_eq!(&bytes[8..12], &90.0f32.to_le_bytes());
    }

    #[test]
    fn frame_decodes_known_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&10.0f32.to_le_bytes());
        bytes.extend_from_slice(&20.0f32.to_le_bytes());
        bytes.extend_from_slice(&5.0f32.to_le_bytes());

        let frame = TelemetryFrame::decode(&bytes).unwrap();
        assert_eq!(frame, TelemetryFrame::new(10.0, 20.0, 5.0));
        assert_eq!(frame.encode().as_slice(), bytes.as_slice());
    }

    #[test]
    fn decode_rejects_wrong_lengths() {
        for len in [0usize, 7, 11, 13, 16] {
            let err = TelemetryFrame::decode(&vec![0u8; len]).unwrap_err();
            assert_eq!(err, SaberError::MalformedFrame { len });
        }
    }

    #[test]
    fn decode_rejects_non_finite_angles() {
        for frame in [
            TelemetryFrame::new(f32::NAN, 0.0, 0.0),
            TelemetryFrame::new(0.0, f32::INFINITY, 0.0),
            TelemetryFrame::new(0.0, 0.0, f32::NEG_INFINITY),
        ] {
            assert_eq!(TelemetryFrame::decode(&frame.encode()), Err(SaberError::NonFiniteFrame));
        }
        assert!(TelemetryFrame::decode(&TelemetryFrame::new(f32::MAX, -0.0, 1e-30).encode()).is_ok());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn session_state_serialises_lowercase() {
        let json = serde_json::to_string(&SessionState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn saber_error_display() {
        let err = SaberError::MalformedFrame { len: 7 };
        assert!(err.to_string().contains("got 7"));

        let err2 = SaberError::Bind {
            addr: "0.0.0.0:3000".to_string(),
            details: "address in use".to_string(),
        };
        assert!(err2.to_string().contains("0.0.0.0:3000"));
    }
}
