//! [`ConnectionRegistry`] – the set of live relay sessions.
//!
//! Each entry maps a [`SessionId`] to the [`PeerSink`] used to push payloads
//! toward that connection.  The registry is only mutated on connect
//! (insert) and on close or fatal send (remove); broadcast code works from a
//! [`snapshot`][ConnectionRegistry::snapshot] so that removals during a
//! fan-out never skip or duplicate a member.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use saber_types::{SaberError, SessionId};
use tokio::sync::mpsc;

/// Outbound half of a relay session.
///
/// Implementations must not block: a recipient that cannot take the payload
/// right now reports an error and is evicted by the relay.
pub trait PeerSink: Send + Sync {
    fn send(&self, payload: Bytes) -> Result<(), SaberError>;
}

/// [`PeerSink`] backed by a bounded Tokio channel drained by the
/// connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl PeerSink for ChannelSink {
    fn send(&self, payload: Bytes) -> Result<(), SaberError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SaberError::SendFailed("send queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                SaberError::SendFailed("connection closed".to_string())
            }
        })
    }
}

struct Entry {
    sink: Arc<dyn PeerSink>,
    info: SessionInfo,
}

/// Metadata of a departed session, as returned by
/// [`ConnectionRegistry::remove`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Milliseconds between registration and `now`, floored at zero.
    pub fn connected_ms(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.connected_at).num_milliseconds()).unwrap_or(0)
    }
}

/// Thread-safe set of live sessions.
///
/// The lock is held only for the duration of a single insert, remove or
/// snapshot, never across an `.await` or a send.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session.  Returns `false` if `id` was already present (the
    /// previous sink is replaced).
    pub fn insert(&self, id: SessionId, peer: Option<SocketAddr>, sink: Arc<dyn PeerSink>) -> bool {
        let entry = Entry {
            sink,
            info: SessionInfo {
                peer,
                connected_at: Utc::now(),
            },
        };
        self.lock().insert(id, entry).is_none()
    }

    /// Remove a session and return its metadata.  Removing an absent
    /// session is a no-op that returns `None`.
    pub fn remove(&self, id: &SessionId) -> Option<SessionInfo> {
        self.lock().remove(id).map(|entry| entry.info)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable copy of the current members and their sinks.
    pub fn snapshot(&self) -> Vec<(SessionId, Arc<dyn PeerSink>)> {
        self.lock()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(&entry.sink)))
            .collect()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
