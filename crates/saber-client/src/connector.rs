//! Transport seam for [`ConnectionSession`][crate::session::ConnectionSession].
//!
//! A [`Connector`] opens one connection and returns it as a [`Link`]: an
//! outbound sink of payloads plus an inbound stream of payloads.  The session
//! owns the reconnect policy; connectors only know how to dial once.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt, TryStreamExt};
use saber_types::SaberError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Outbound half of a [`Link`].
pub type PayloadSink = Pin<Box<dyn Sink<Bytes, Error = SaberError> + Send>>;

/// Inbound half of a [`Link`].  The stream ending (or yielding an error)
/// means the connection is gone.
pub type PayloadStream = BoxStream<'static, Result<Bytes, SaberError>>;

/// One live connection.
pub struct Link {
    pub outbound: PayloadSink,
    pub inbound: PayloadStream,
}

/// Dials the relay.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a single connection.
    async fn connect(&self) -> Result<Link, SaberError>;

    /// Human-readable target, for logs.
    fn target(&self) -> String;
}

/// [`Connector`] for `ws://` and `wss://` relay URLs.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, SaberError> {
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SaberError::Transport(format!("connect {}: {e}", self.url)))?;

        let (ws_tx, ws_rx) = ws_stream.split();

        let outbound = ws_tx
            .with(|payload: Bytes| async move {
                Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Binary(payload))
            })
            .sink_map_err(|e| SaberError::Transport(e.to_string()));

        // Only data messages become payloads; control frames are handled by
        // tungstenite and a close ends the stream.
        let inbound = ws_rx
            .map_err(|e| SaberError::Transport(e.to_string()))
            .try_take_while(|msg| std::future::ready(Ok::<_, SaberError>(!msg.is_close())))
            .try_filter_map(|msg| {
                std::future::ready(Ok::<_, SaberError>(match msg {
                    Message::Binary(payload) => Some(payload),
                    Message::Text(text) => Some(Bytes::copy_from_slice(text.as_str().as_bytes())),
                    other => {
                        debug!(kind = ?other, "ignoring control message");
                        None
                    }
                }))
            });

        Ok(Link {
            outbound: Box::pin(outbound),
            inbound: inbound.boxed(),
        })
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_is_transport_error() {
        // Bind then drop to find a port with nobody listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(format!("ws://{addr}"));
        let err = connector.connect().await.err().expect("should fail");
        assert!(matches!(err, SaberError::Transport(_)));
        assert_eq!(connector.target(), format!("ws://{addr}"));
    }

    #[tokio::test]
    async fn link_carries_binary_both_ways() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo server.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_binary() {
                    ws.send(msg).await.unwrap();
                }
            }
        });

        let mut link = WsConnector::new(format!("ws://{addr}")).connect().await.unwrap();
        link.outbound.send(Bytes::from_static(b"twelve bytes")).await.unwrap();
        let echoed = link.inbound.next().await.unwrap().unwrap();
        assert_eq!(echoed, Bytes::from_static(b"twelve bytes"));
    }
}
