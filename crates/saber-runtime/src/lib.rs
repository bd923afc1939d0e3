//! `saber-runtime` – the client-side pipelines.
//!
//! Glues a [`ConnectionSession`][saber_client::ConnectionSession] to the
//! pose and collision layer.
//!
//! # Modules
//!
//! - [`viewer`] – [`Viewer`][viewer::Viewer]: applies relayed frames to a
//!   [`SharedPose`][viewer::SharedPose] and runs the
//!   [`CollisionDetector`][saber_perception::CollisionDetector] on a fixed
//!   tick, reporting each [`Hit`][viewer::Hit].
//! - [`sensor`] – parses `alpha beta gamma` sample lines and sends them as
//!   telemetry frames; also provides a synthetic sweep for demo runs.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod sensor;
pub mod telemetry;
pub mod viewer;

pub use sensor::{SensorStats, parse_sample, stream_samples, sweep_sample};
pub use viewer::{DEFAULT_TICK_HZ, Hit, SharedPose, Viewer};
