//! Beacon: OpenTelemetry bootstrap for tonic and axum services.
//!
//! Beacon wires a service into an OTLP collector with two setup calls and
//! records a shared request counter and latency histogram from HTTP and RPC
//! handlers.
//!
//! # Architecture
//!
//! - **Opt-in**: nothing is exported unless `OTEL_ENABLE=true` and a
//!   collector endpoint are both configured
//! - **Never fatal**: every setup failure degrades to no-op telemetry
//! - **One channel**: traces and metrics share a single lazily connected
//!   gRPC channel to the collector
//! - **Explicit context**: all state lives in a cloneable [`Telemetry`]
//!
//! # Modules
//!
//! - [`config`]: Environment and CLI configuration
//! - [`collector`]: Memoized collector channel
//! - [`resource`]: Service identity attached to every signal
//! - [`observability`]: Trace, metric and logging setup
//! - [`middleware`]: HTTP and gRPC layers, RPC interceptors
//! - [`client`]: Outbound HTTP with trace context propagation
//! - [`server`]: Demo HTTP server

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // middleware::http::HttpMetricsLayer is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod resource;
pub mod server;
pub mod telemetry;

pub use client::{do_request, HttpClient};
pub use config::TelemetryConfig;
pub use error::{Result, TelemetryError};
pub use observability::trace::SpanOptions;
pub use observability::ProviderGuard;
pub use telemetry::Telemetry;
