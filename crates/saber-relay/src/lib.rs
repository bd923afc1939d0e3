//! `saber-relay` – The Telemetry Fan-out Relay
//!
//! Forwards every payload received from one connected client to every other
//! connected client, without looking at its contents.
//!
//! # Modules
//!
//! - [`registry`] – [`ConnectionRegistry`]: the mutex-guarded set of live
//!   sessions and the [`PeerSink`] used to reach each of them.
//! - [`relay`] – [`TelemetryRelay`]: broadcast-except-self fan-out with
//!   per-recipient failure isolation.
//! - [`server`] – [`RelayServer`]: TCP listener, TLS (plaintext only on
//!   explicit opt-in), WebSocket handshake and one task per connection.
//! - [`tls`] – PEM credential loading for the listener.

pub mod registry;
pub mod relay;
pub mod server;
pub mod tls;

pub use registry::{ChannelSink, ConnectionRegistry, PeerSink, SessionInfo};
pub use relay::{FanOut, TelemetryRelay};
pub use server::{BoundRelay, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SEND_QUEUE, RelayConfig, RelayServer};
pub use tls::TlsPaths;
