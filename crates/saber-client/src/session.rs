//! [`ConnectionSession`] – a self-healing connection to the relay.
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─► Disconnected ─(delay)─► Connecting …
//!                     │                                                ▲
//!                     └──────────── connect failed ──(delay)───────────┘
//! ```
//!
//! There is no terminal state and no retry cap: the session keeps dialling
//! at a constant [`SessionConfig::reconnect_delay`] until its task is
//! aborted or the frame receiver is dropped.
//!
//! * State changes are published on a [`watch`] channel (the "connected" /
//!   "disconnected" status signal).
//! * Inbound payloads are delivered on an [`mpsc`] channel.
//! * Outbound payloads go out immediately while connected.  Anything offered
//!   while not connected is dropped, and nothing queued at the moment of a
//!   disconnect is replayed after reconnecting.
//! * [`SessionHandle::send_when_ready`] waits for queue room while the link is
//!   up, and [`SessionHandle::flush`] resolves once everything queued before
//!   it has been written to the link.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use saber_types::{SessionState, TelemetryFrame};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::connector::{Connector, Link};

/// Wait between the end of one connection (or failed attempt) and the next
/// attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default depth of the inbound frame channel.
pub const DEFAULT_INBOUND_BUFFER: usize = 256;

/// Default depth of the outbound channel.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Tunables for a [`ConnectionSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub reconnect_delay: Duration,
    pub inbound_buffer: usize,
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl SessionConfig {
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Item on the outbound channel.
#[derive(Debug)]
enum Outbound {
    Payload(Bytes),
    /// Answered once every earlier payload has been written and flushed.
    Flush(oneshot::Sender<()>),
}

/// Result of [`SessionHandle::send_when_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the live connection.
    Queued,
    /// Dropped because the session was not connected.
    Disconnected,
    /// The session task has stopped.
    Closed,
}

/// Cheap, cloneable front end to a running [`ConnectionSession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    outbound: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// A fresh receiver for the status signal.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Offer a payload for sending.
    ///
    /// Returns `false` when the payload was dropped because the session is
    /// not connected or the outbound channel is full.
    pub fn send(&self, payload: Bytes) -> bool {
        if !self.is_connected() {
            trace!("dropping outbound payload while disconnected");
            return false;
        }
        self.outbound.try_send(Outbound::Payload(payload)).is_ok()
    }

    /// Encode and offer a telemetry frame.
    pub fn send_frame(&self, frame: &TelemetryFrame) -> bool {
        self.send(Bytes::copy_from_slice(&frame.encode()))
    }

    /// Queue a payload, waiting for room while the session stays connected.
    ///
    /// The payload is dropped if the session is not connected when called or
    /// disconnects while waiting.
    pub async fn send_when_ready(&self, payload: Bytes) -> Delivery {
        if !self.is_connected() {
            trace!("dropping outbound payload while disconnected");
            return Delivery::Disconnected;
        }

        let mut state = self.state.clone();
        let link_down = async move {
            loop {
                if *state.borrow_and_update() != SessionState::Connected {
                    return;
                }
                if state.changed().await.is_err() {
                    return;
                }
            }
        };

        tokio::select! {
            permit = self.outbound.reserve() => match permit {
                Ok(permit) => {
                    permit.send(Outbound::Payload(payload));
                    Delivery::Queued
                }
                Err(_) => Delivery::Closed,
            },
            _ = link_down => Delivery::Disconnected,
        }
    }

    /// [`send_when_ready`][Self::send_when_ready] for a telemetry frame.
    pub async fn send_frame_when_ready(&self, frame: &TelemetryFrame) -> Delivery {
        self.send_when_ready(Bytes::copy_from_slice(&frame.encode())).await
    }

    /// Resolve once every payload queued before this call has been written
    /// to the link.
    ///
    /// Returns `false` if the session is not connected, or if the connection
    /// drops before the queue is drained.
    pub async fn flush(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.outbound.send(Outbound::Flush(done_tx)).await.is_err() {
            return false;
        }
        done_rx.await.is_ok()
    }

    /// Resolve once the session reaches `want`.
    ///
    /// Returns `false` if the session task ended first.
    pub async fn wait_for_state(&self, want: SessionState) -> bool {
        let mut rx = self.state.clone();
        loop {
            if *rx.borrow_and_update() == want {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionSession
// ---------------------------------------------------------------------------

/// How a live connection ended.
enum LinkEnd {
    /// Transport closed or failed; reconnect.
    Lost,
    /// Nobody is reading frames any more; stop.
    ConsumerGone,
}

/// Owns one outbound connection and its reconnect loop.
pub struct ConnectionSession<C> {
    connector: C,
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    inbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: mpsc::Receiver<Outbound>,
    outbound_open: bool,
    attempts: u64,
}

impl<C: Connector> ConnectionSession<C> {
    /// Build a session plus its handle and inbound frame receiver.
    ///
    /// Nothing happens until [`run`][Self::run] is awaited (typically inside
    /// `tokio::spawn`).
    pub fn new(connector: C, config: SessionConfig) -> (Self, SessionHandle, mpsc::Receiver<Bytes>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));

        let session = Self {
            connector,
            config,
            state_tx,
            inbound_tx,
            outbound_rx,
            outbound_open: true,
            attempts: 0,
        };
        let handle = SessionHandle {
            state: state_rx,
            outbound: outbound_tx,
        };
        (session, handle, inbound_rx)
    }

    /// Connect, pump, and reconnect forever.
    ///
    /// Returns only once the inbound frame receiver has been dropped.
    pub async fn run(mut self) {
        let target = self.connector.target();

        loop {
            if self.inbound_tx.is_closed() {
                debug!(relay = %target, "frame consumer gone; session stopping");
                return;
            }

            self.set_state(SessionState::Connecting);
            self.attempts += 1;
            self.discard_outbound();

            match self.connector.connect().await {
                Ok(link) => {
                    self.set_state(SessionState::Connected);
                    info!(relay = %target, attempt = self.attempts, "connected to relay");

                    let end = self.pump(link).await;
                    self.set_state(SessionState::Disconnected);

                    if let LinkEnd::ConsumerGone = end {
                        debug!(relay = %target, "frame consumer gone; session stopping");
                        return;
                    }
                    warn!(
                        relay = %target,
                        retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "disconnected from relay"
                    );
                }
                Err(e) => {
                    self.set_state(SessionState::Disconnected);
                    warn!(
                        relay = %target,
                        attempt = self.attempts,
                        error = %e,
                        retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "connect failed"
                    );
                }
            }

            self.discard_outbound();
            self.wait_before_retry().await;
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Shuttle payloads until the link dies or the consumer disappears.
    async fn pump(&mut self, link: Link) -> LinkEnd {
        let Link {
            mut outbound,
            mut inbound,
        } = link;

        loop {
            tokio::select! {
                _ = self.inbound_tx.closed() => return LinkEnd::ConsumerGone,
                received = inbound.next() => {
                    match received {
                        Some(Ok(payload)) => match self.inbound_tx.try_send(payload) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                debug!("inbound buffer full; dropping frame");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                return LinkEnd::ConsumerGone;
                            }
                        },
                        Some(Err(e)) => {
                            warn!(error = %e, "receive failed");
                            return LinkEnd::Lost;
                        }
                        None => return LinkEnd::Lost,
                    }
                }
                queued = self.outbound_rx.recv(), if self.outbound_open => {
                    match queued {
                        Some(Outbound::Payload(payload)) => {
                            if let Err(e) = outbound.send(payload).await {
                                warn!(error = %e, "send failed");
                                return LinkEnd::Lost;
                            }
                        }
                        Some(Outbound::Flush(done)) => {
                            if let Err(e) = outbound.flush().await {
                                warn!(error = %e, "flush failed");
                                return LinkEnd::Lost;
                            }
                            let _ = done.send(());
                        }
                        None => self.outbound_open = false,
                    }
                }
            }
        }
    }

    /// Drop anything queued for sending; it belongs to a dead connection.
    fn discard_outbound(&mut self) {
        let mut dropped = 0usize;
        while let Ok(item) = self.outbound_rx.try_recv() {
            if let Outbound::Payload(_) = item {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, "discarded outbound payloads queued across a disconnect");
        }
    }

    /// Non-blocking reconnect timer.  Payloads offered meanwhile are dropped
    /// and pending flushes fail.
    async fn wait_before_retry(&mut self) {
        let sleep = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                queued = self.outbound_rx.recv(), if self.outbound_open => {
                    if queued.is_none() {
                        self.outbound_open = false;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
