//! Sensor pipeline: orientation samples in, telemetry frames out.
//!
//! Samples arrive one per line as three numbers in degrees,
//! `alpha beta gamma`, separated by whitespace or commas.  Blank lines and
//! lines starting with `#` are skipped.  Each parsed sample is encoded and
//! offered to a [`SessionHandle`].  While the session is connected the reader
//! waits for room in the outbound queue, so piped input is never lost to a
//! full queue.  While it is not connected the frame is dropped, never queued.

use std::time::Duration;

use saber_client::{Delivery, SessionHandle};
use saber_types::{SaberError, TelemetryFrame};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Counters for one run of [`stream_samples`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorStats {
    pub sent: u64,
    /// Parsed but offered while the session was down.
    pub dropped: u64,
    /// Unparseable or non-finite lines.
    pub invalid: u64,
}

/// Parse one `alpha beta gamma` sample line.
///
/// Returns `Ok(None)` for blank and comment lines.
pub fn parse_sample(line: &str) -> Result<Option<TelemetryFrame>, SaberError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let values = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .map_err(|e| SaberError::Config(format!("bad sample value {s:?}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match values.as_slice() {
        [alpha, beta, gamma] => {
            let frame = TelemetryFrame::new(*alpha, *beta, *gamma);
            if !frame.is_finite() {
                return Err(SaberError::Config(format!("sample values must be finite: {line:?}")));
            }
            Ok(Some(frame))
        }
        other => Err(SaberError::Config(format!(
            "expected 3 values (alpha beta gamma), got {}",
            other.len()
        ))),
    }
}

/// Read samples from `reader` until EOF and send each one through `handle`.
///
/// Unparseable lines are logged and counted, never fatal.  Call
/// [`SessionHandle::flush`] afterwards to wait for the queued frames to reach
/// the relay.
///
/// # Errors
///
/// Fails if reading from `reader` fails or the session task has stopped.
pub async fn stream_samples<R>(reader: R, handle: &SessionHandle) -> Result<SensorStats, SaberError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = SensorStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SaberError::Transport(format!("reading samples: {e}")))?
    {
        match parse_sample(&line) {
            Ok(Some(frame)) => match handle.send_frame_when_ready(&frame).await {
                Delivery::Queued => stats.sent += 1,
                Delivery::Disconnected => {
                    stats.dropped += 1;
                    debug!(state = %handle.state(), "sample dropped while not connected");
                }
                Delivery::Closed => {
                    return Err(SaberError::SendFailed("relay session has stopped".to_string()));
                }
            },
            Ok(None) => {}
            Err(e) => {
                stats.invalid += 1;
                warn!(line = %line, error = %e, "skipping sample");
            }
        }
    }

    info!(sent = stats.sent, dropped = stats.dropped, invalid = stats.invalid, "sample stream ended");
    Ok(stats)
}

/// Synthetic sample for demo runs with no hardware attached.
///
/// Sweeps the hilt through a slow figure-eight: `alpha` and `gamma` swing
/// ±60° out of phase while `beta` turns at 30°/s.
pub fn sweep_sample(elapsed: Duration) -> TelemetryFrame {
    let t = elapsed.as_secs_f64();
    let alpha = 60.0 * (t * 1.3).sin();
    let beta = (t * 30.0) % 360.0;
    let gamma = 60.0 * (t * 2.6).sin();
    TelemetryFrame::new(alpha as f32, beta as f32, gamma as f32)
}
