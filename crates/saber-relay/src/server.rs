//! [`RelayServer`] – WebSocket front end for the [`TelemetryRelay`].
//!
//! Listens on `0.0.0.0:3000` by default (see [`RelayConfig`]).
//!
//! * TLS termination (see [`crate::tls`]).  Missing or bad credentials stop
//!   startup; plaintext `ws://` is served only when
//!   [`RelayConfig::insecure`] is set.
//! * Every accepted socket gets its own task, a [`SessionId`] and a bounded
//!   outbound queue registered with the relay as a [`ChannelSink`].
//! * Inbound binary (and text) messages are handed to
//!   [`TelemetryRelay::on_message`]; queued outbound payloads are written as
//!   binary messages.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use saber_types::{SaberError, SessionId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::registry::ChannelSink;
use crate::relay::TelemetryRelay;
use crate::tls::{self, TlsPaths};

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 3000;

/// Default per-session outbound queue depth.  A recipient that falls this
/// many payloads behind is evicted.
pub const DEFAULT_SEND_QUEUE: usize = 64;

/// Listener settings for [`RelayServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsPaths>,
    /// Serve plaintext when no TLS credentials are configured.
    pub insecure: bool,
    pub send_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            insecure: false,
            send_queue: DEFAULT_SEND_QUEUE,
        }
    }
}

impl RelayConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls(mut self, paths: TlsPaths) -> Self {
        self.tls = Some(paths);
        self
    }

    /// Allow plaintext `ws://` when no TLS credentials are configured.
    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn with_send_queue(mut self, depth: usize) -> Self {
        self.send_queue = depth.max(1);
        self
    }

    /// `host:port` as passed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// WebSocket relay server.
///
/// # Example
///
/// ```rust,no_run
/// use saber_relay::{RelayConfig, RelayServer, TlsPaths};
///
/// #[tokio::main]
/// async fn main() {
///     let config = RelayConfig::default().with_tls(TlsPaths::new("cert.pem", "key.pem"));
///     RelayServer::new(config)
///         .run()
///         .await
///         .expect("relay failed");
/// }
/// ```
pub struct RelayServer {
    config: RelayConfig,
    relay: Arc<TelemetryRelay>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            relay: Arc::new(TelemetryRelay::new()),
        }
    }

    pub fn relay(&self) -> Arc<TelemetryRelay> {
        Arc::clone(&self.relay)
    }

    /// Load TLS credentials and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns [`SaberError::Tls`] for missing or unusable credentials
    /// (unless [`RelayConfig::insecure`] is set and none are configured) and
    /// [`SaberError::Bind`] if the listener cannot bind.  Both are fatal:
    /// nothing is served.
    pub async fn bind(self) -> Result<BoundRelay, SaberError> {
        let acceptor = match (&self.config.tls, self.config.insecure) {
            (Some(paths), _) => Some(tls::load_acceptor(paths)?),
            (None, true) => {
                warn!("no TLS credentials configured; serving plaintext ws://");
                None
            }
            (None, false) => {
                return Err(SaberError::Tls(
                    "no certificate/key configured; set both or opt into plaintext with insecure"
                        .to_string(),
                ));
            }
        };

        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| SaberError::Bind {
            addr: addr.clone(),
            details: e.to_string(),
        })?;
        let local_addr = listener.local_addr().map_err(|e| SaberError::Bind {
            addr,
            details: e.to_string(),
        })?;

        info!(
            addr = %local_addr,
            tls = acceptor.is_some(),
            "relay listening"
        );

        Ok(BoundRelay {
            listener,
            local_addr,
            acceptor,
            relay: self.relay,
            send_queue: self.config.send_queue,
        })
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> Result<(), SaberError> {
        self.bind().await?.serve().await
    }
}

/// A relay whose listener is bound and ready to accept.
pub struct BoundRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    relay: Arc<TelemetryRelay>,
    send_queue: usize,
}

impl BoundRelay {
    /// Address actually bound (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn relay(&self) -> Arc<TelemetryRelay> {
        Arc::clone(&self.relay)
    }

    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self) -> Result<(), SaberError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let relay = Arc::clone(&self.relay);
                    let acceptor = self.acceptor.clone();
                    let queue = self.send_queue;
                    tokio::spawn(async move {
                        if let Err(e) = accept_connection(stream, peer, acceptor, relay, queue).await {
                            error!(peer = %peer, error = %e, "relay client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "relay accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handling
// ---------------------------------------------------------------------------

async fn accept_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    relay: Arc<TelemetryRelay>,
    queue: usize,
) -> Result<(), SaberError> {
    match acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| SaberError::Tls(format!("handshake from {peer}: {e}")))?;
            handle_ws(tls_stream, peer, relay, queue).await
        }
        None => handle_ws(stream, peer, relay, queue).await,
    }
}

async fn handle_ws<S>(
    stream: S,
    peer: SocketAddr,
    relay: Arc<TelemetryRelay>,
    queue: usize,
) -> Result<(), SaberError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| SaberError::Transport(format!("ws handshake from {peer}: {e}")))?;

    let session = SessionId::new();
    let (tx, mut rx) = mpsc::channel::<Bytes>(queue.max(1));
    relay.on_connect(session, Some(peer), Arc::new(ChannelSink::new(tx)));

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let outcome: Result<(), SaberError> = loop {
        tokio::select! {
            // ── Downstream: relay queue → socket ──────────────────────────
            queued = rx.recv() => {
                match queued {
                    Some(payload) => {
                        if let Err(e) = ws_tx.send(Message::Binary(payload)).await {
                            break Err(SaberError::Transport(e.to_string()));
                        }
                    }
                    // Sink dropped: the relay evicted this session.
                    None => {
                        debug!(session = %session, "session evicted by relay");
                        break Ok(());
                    }
                }
            }
            // ── Upstream: socket → relay ──────────────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(payload))) => {
                        relay.on_message(session, payload);
                    }
                    Some(Ok(Message::Text(text))) => {
                        relay.on_message(session, Bytes::copy_from_slice(text.as_str().as_bytes()));
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(SaberError::Transport(e.to_string())),
                    _ => {}
                }
            }
        }
    };

    match &outcome {
        Ok(()) => relay.on_close(session),
        Err(e) => relay.on_error(session, e),
    };
    let _ = ws_tx.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
