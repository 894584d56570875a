//! Explicit telemetry context.
//!
//! A [`Telemetry`] owns everything the setup functions produce: the
//! memoized collector channel, the active tracer and the request instrument
//! pair. It is cheap to clone and is handed to the HTTP layer and the RPC
//! interceptors, so several independent instances can live in one process.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::SdkTracer;

use crate::collector::ConnectionManager;
use crate::config::TelemetryConfig;
use crate::middleware::grpc::{GrpcMetricsLayer, StreamMetricsInterceptor, UnaryMetricsInterceptor};
use crate::middleware::http::HttpMetricsLayer;
use crate::observability::metrics::RequestMetrics;

/// Shared telemetry state for one service.
#[derive(Clone, Debug)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

#[derive(Debug)]
struct TelemetryInner {
    config: TelemetryConfig,
    connection: ConnectionManager,
    tracer: OnceLock<SdkTracer>,
    metrics: OnceLock<RequestMetrics>,
}

impl Telemetry {
    /// Create an uninitialized context. No connection is opened until setup.
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                connection: ConnectionManager::new(config.clone()),
                config,
                tracer: OnceLock::new(),
                metrics: OnceLock::new(),
            }),
        }
    }

    /// Create a context from `OTEL_ENABLE`, `OTEL_COLLECTOR_ENDPOINT`,
    /// `SERVICE_VERSION` and `ENV`.
    pub fn from_env() -> Self {
        Self::new(TelemetryConfig::from_env())
    }

    /// A context that never exports anything.
    pub fn disabled() -> Self {
        Self::new(TelemetryConfig::default())
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    /// The collector connection manager backing this context.
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// The active tracer, if tracing setup succeeded.
    pub fn tracer(&self) -> Option<SdkTracer> {
        self.inner.tracer.get().cloned()
    }

    /// The request instrument pair, if metrics setup succeeded.
    pub fn request_metrics(&self) -> Option<&RequestMetrics> {
        self.inner.metrics.get()
    }

    /// Tower layer recording request metrics for an HTTP service.
    pub fn http_layer(&self) -> HttpMetricsLayer {
        HttpMetricsLayer::new(self.clone())
    }

    /// Tower layer recording request metrics for a tonic server.
    pub fn grpc_layer(&self) -> GrpcMetricsLayer {
        GrpcMetricsLayer::new(self.clone())
    }

    /// Interceptor recording request metrics for unary RPCs.
    pub fn unary_interceptor(&self) -> UnaryMetricsInterceptor {
        UnaryMetricsInterceptor::new(self.clone())
    }

    /// Interceptor recording request metrics for streaming RPCs.
    pub fn stream_interceptor(&self) -> StreamMetricsInterceptor {
        StreamMetricsInterceptor::new(self.clone())
    }

    /// Record one request against the instrument pair.
    ///
    /// Does nothing when metrics were never set up.
    pub fn record_request(&self, elapsed: Duration, attributes: &[KeyValue]) {
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record(elapsed, attributes);
        }
    }

    /// Install the active tracer. Returns `false` if one is already set.
    pub(crate) fn set_tracer(&self, tracer: SdkTracer) -> bool {
        self.inner.tracer.set(tracer).is_ok()
    }

    /// Install the instrument pair. Returns `false` if one is already set.
    pub(crate) fn set_request_metrics(&self, metrics: RequestMetrics) -> bool {
        self.inner.metrics.set(metrics).is_ok()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_context_is_empty() {
        let telemetry = Telemetry::disabled();
        assert!(telemetry.tracer().is_none());
        assert!(telemetry.request_metrics().is_none());
        assert!(!telemetry.connection().is_connected());
    }

    #[test]
    fn test_record_without_metrics_is_noop() {
        let telemetry = Telemetry::disabled();
        // Should not panic
        telemetry.record_request(Duration::from_millis(5), &[KeyValue::new("method", "GET")]);
    }

    #[test]
    fn test_clones_share_state() {
        let telemetry = Telemetry::disabled();
        let clone = telemetry.clone();
        assert!(Arc::ptr_eq(&telemetry.inner, &clone.inner));
    }
}
