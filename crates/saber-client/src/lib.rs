//! `saber-client` – The Relay Connection
//!
//! Client-side half of the relay link shared by the sensor and the viewer.
//!
//! # Modules
//!
//! - [`connector`] – the [`Connector`] trait (dial once) and the
//!   tokio-tungstenite backed [`WsConnector`] for `ws://` / `wss://` URLs.
//! - [`session`] – [`ConnectionSession`]: connect, pump payloads, and on any
//!   closure retry after a fixed delay, forever.  Exposes a
//!   [`SessionHandle`] for sending and for the connected/disconnected status
//!   signal.

pub mod connector;
pub mod session;

pub use connector::{Connector, Link, PayloadSink, PayloadStream, WsConnector};
pub use session::{
    ConnectionSession, DEFAULT_RECONNECT_DELAY, Delivery, SessionConfig, SessionHandle,
};
