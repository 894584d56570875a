//! Request instrumentation for inbound traffic.
//!
//! Provides:
//! - A tower layer recording request metrics for axum/hyper services
//! - A tower layer recording request metrics for tonic servers
//! - Typed interceptors recording request metrics for tonic handlers

pub mod grpc;
pub mod http;

pub use grpc::{
    GrpcMetricsLayer, GrpcMetricsService, MeteredBody, MeteredStream, StreamMetricsInterceptor,
    UnaryMetricsInterceptor,
};
pub use http::{HttpMetricsLayer, HttpMetricsService, StatusLatch};
