//! [`TelemetryRelay`] – broadcast-except-self fan-out.
//!
//! The relay owns a [`ConnectionRegistry`] and never looks inside the
//! payloads it forwards.  A payload received from one session is pushed to
//! every *other* session in a snapshot of the registry.
//!
//! Send failures are contained per recipient: the failing session is
//! evicted, the failure is logged, and delivery continues to the remaining
//! recipients.  Nothing is propagated to the sender.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use saber_types::SessionId;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, PeerSink};

/// Outcome of one fan-out, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Recipients that accepted the payload.
    pub delivered: usize,
    /// Recipients whose send failed; they are no longer registered.
    pub evicted: Vec<SessionId>,
}

/// Fan-out relay over a [`ConnectionRegistry`].
#[derive(Debug, Default)]
pub struct TelemetryRelay {
    registry: ConnectionRegistry,
}

impl TelemetryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register a newly connected session.
    pub fn on_connect(&self, session: SessionId, peer: Option<SocketAddr>, sink: Arc<dyn PeerSink>) {
        self.registry.insert(session, peer, sink);
        info!(session = %session, peer = ?peer, sessions = self.registry.len(), "session connected");
    }

    /// Forward `payload` from `from` to every other registered session.
    pub fn on_message(&self, from: SessionId, payload: Bytes) -> FanOut {
        let mut report = FanOut::default();

        for (id, sink) in self.registry.snapshot() {
            if id == from {
                continue;
            }
            match sink.send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session = %id, from = %from, error = %e, "fan-out send failed; evicting session");
                    self.registry.remove(&id);
                    report.evicted.push(id);
                }
            }
        }

        debug!(
            from = %from,
            len = payload.len(),
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "payload relayed"
        );
        report
    }

    /// Unregister a session that closed normally.  Idempotent.
    pub fn on_close(&self, session: SessionId) -> bool {
        match self.registry.remove(&session) {
            Some(info) => {
                info!(
                    session = %session,
                    peer = ?info.peer,
                    connected_ms = info.connected_ms(Utc::now()),
                    sessions = self.registry.len(),
                    "session closed"
                );
                true
            }
            None => false,
        }
    }

    /// Unregister a session after a transport error.  Idempotent.
    pub fn on_error(&self, session: SessionId, error: &dyn std::fmt::Display) -> bool {
        let removed = self.registry.remove(&session);
        warn!(
            session = %session,
            error = %error,
            peer = ?removed.as_ref().and_then(|info| info.peer),
            connected_ms = removed.as_ref().map(|info| info.connected_ms(Utc::now())),
            "session transport error"
        );
        removed.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use saber_types::{SaberError, TelemetryFrame};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<Bytes>>,
    }

    impl RecordingSink {
        fn received(&self) -> Vec<Bytes> {
            self.received.lock().unwrap().clone()
        }
    }

    impl PeerSink for RecordingSink {
        fn send(&self, payload: Bytes) -> Result<(), SaberError> {
            self.received.lock().unwrap().push(payload);
            Ok(())
        }
    }

    struct FailingSink;

    impl PeerSink for FailingSink {
        fn send(&self, _payload: Bytes) -> Result<(), SaberError> {
            Err(SaberError::SendFailed("socket reset".to_string()))
        }
    }

    fn connect_recorders(relay: &TelemetryRelay, n: usize) -> Vec<(SessionId, Arc<RecordingSink>)> {
        (0..n)
            .map(|_| {
                let id = SessionId::new();
                let sink = Arc::new(RecordingSink::default());
                relay.on_connect(id, None, sink.clone());
                (id, sink)
            })
            .collect()
    }

    fn frame_bytes() -> Bytes {
        Bytes::copy_from_slice(&TelemetryFrame::new(10.0, 20.0, 5.0).encode())
    }

    #[test]
    fn fan_out_reaches_every_other_session() {
        let relay = TelemetryRelay::new();
        let sessions = connect_recorders(&relay, 4);

        for (sender_idx, (sender, _)) in sessions.iter().enumerate() {
            let payload = Bytes::from(vec![sender_idx as u8; 12]);
            let report = relay.on_message(*sender, payload);
            assert_eq!(report.delivered, 3);
            assert!(report.evicted.is_empty());
        }

        for (idx, (_, sink)) in sessions.iter().enumerate() {
            let got = sink.received();
            assert_eq!(got.len(), 3, "session {idx} should get 3 payloads");
            assert!(
                got.iter().all(|p| p[0] != idx as u8),
                "session {idx} must never receive its own payload"
            );
        }
    }

    #[test]
    fn two_sessions_exchange_exact_bytes() {
        let relay = TelemetryRelay::new();
        let sessions = connect_recorders(&relay, 2);
        let (a, a_sink) = &sessions[0];
        let (_, b_sink) = &sessions[1];

        relay.on_message(*a, frame_bytes());

        assert_eq!(b_sink.received(), vec![frame_bytes()]);
        assert!(a_sink.received().is_empty());
    }

    #[test]
    fn lone_sender_reaches_nobody() {
        let relay = TelemetryRelay::new();
        let sessions = connect_recorders(&relay, 1);
        let report = relay.on_message(sessions[0].0, frame_bytes());
        assert_eq!(report, FanOut::default());
    }

    #[test]
    fn failing_recipient_is_isolated_and_evicted() {
        let relay = TelemetryRelay::new();
        let sessions = connect_recorders(&relay, 3);
        let broken = SessionId::new();
        relay.on_connect(broken, None, Arc::new(FailingSink));
        assert_eq!(relay.registry().len(), 4);

        let (sender, _) = sessions[0];
        let report = relay.on_message(sender, frame_bytes());

        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, vec![broken]);
        assert!(!relay.registry().contains(&broken));
        for (_, sink) in &sessions[1..] {
            assert_eq!(sink.received(), vec![frame_bytes()]);
        }

        // Later broadcasts no longer try the evicted session.
        let report = relay.on_message(sender, frame_bytes());
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());
    }

    #[test]
    fn failing_sender_side_does_not_matter() {
        // A session whose own sink is broken can still send.
        let relay = TelemetryRelay::new();
        let sessions = connect_recorders(&relay, 2);
        let broken = SessionId::new();
        relay.on_connect(broken, None, Arc::new(FailingSink));

        let report = relay.on_message(broken, frame_bytes());
        assert_eq!(report.delivered, 2);
        assert!(relay.registry().contains(&broken));
        for (_, sink) in &sessions {
            assert_eq!(sink.received().len(), 1);
        }
    }

    #[test]
    fn close_and_error_are_idempotent() {
        let relay = TelemetryRelay::new();
        let sessions = connect_recorders(&relay, 2);
        let (a, _) = sessions[0];
        let (b, _) = sessions[1];

        assert!(relay.on_close(a));
        assert!(!relay.on_close(a));
        assert!(relay.on_error(b, &"connection reset"));
        assert!(!relay.on_error(b, &"connection reset"));
        assert!(relay.registry().is_empty());
    }

    #[test]
    fn payloads_are_forwarded_opaquely() {
        let relay = TelemetryRelay::new();
        let sessions = connect_recorders(&relay, 2);
        // Not a telemetry frame; the relay does not care.
        let odd = Bytes::from_static(b"seven!!");
        relay.on_message(sessions[0].0, odd.clone());
        assert_eq!(sessions[1].1.received(), vec![odd]);
    }

    #[test]
    fn concurrent_broadcast_and_churn() {
        let relay = Arc::new(TelemetryRelay::new());
        let stable = connect_recorders(&relay, 2);
        let (sender, _) = stable[0];

        let churn = {
            let relay = Arc::clone(&relay);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let id = SessionId::new();
                    relay.on_connect(id, None, Arc::new(RecordingSink::default()));
                    relay.on_close(id);
                }
            })
        };
        for _ in 0..500 {
            relay.on_message(sender, frame_bytes());
        }
        churn.join().unwrap();

        assert_eq!(stable[1].1.received().len(), 500);
        assert_eq!(relay.registry().len(), 2);
    }
}
