//! `busgate-runtime` – process-level wiring for the gateway.
//!
//! - [`gateway`] – [`Gateway::start`] loads the configured modules and
//!   launches the supervisor; [`RunningGateway`] waits for a shutdown request
//!   and runs the stop sequence.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] installs the
//!   `tracing` subscriber with optional OTLP span export.

pub mod gateway;
pub mod telemetry;

pub use gateway::{Gateway, RunningGateway};
