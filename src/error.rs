//! Error taxonomy for telemetry setup and outbound calls.
//!
//! Setup errors never escape the setup functions: they are logged and turned
//! into a no-op fallback. They are public so callers of the lower-level
//! pieces (collector, resource, instrument validation) can match on them.

use thiserror::Error;

/// Errors produced while wiring up telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The enablement flag is not exactly `true`.
    #[error("telemetry disabled via OTEL_ENABLE (got {0:?})")]
    Disabled(Option<String>),

    /// No collector endpoint was configured.
    #[error("OTEL_COLLECTOR_ENDPOINT not set")]
    MissingEndpoint,

    /// The channel to the collector could not be opened.
    #[error("failed to create gRPC channel to collector: {0}")]
    ConnectionFailed(String),

    /// The OTLP exporter could not be built over the channel.
    #[error("failed to create OTLP exporter: {0}")]
    ExporterBuildFailed(String),

    /// The resource descriptor could not be assembled.
    #[error("failed to build resource: {0}")]
    ResourceBuildFailed(String),

    /// One of the request instruments has an invalid definition.
    #[error("failed to create instrument {name}: {reason}")]
    InstrumentBuildFailed { name: &'static str, reason: String },

    /// An outbound HTTP request failed.
    #[error("outbound request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TelemetryError::Disabled(Some("TRUE".into())).to_string(),
            "telemetry disabled via OTEL_ENABLE (got Some(\"TRUE\"))"
        );
        assert_eq!(
            TelemetryError::MissingEndpoint.to_string(),
            "OTEL_COLLECTOR_ENDPOINT not set"
        );
        let err = TelemetryError::InstrumentBuildFailed {
            name: "http_requests_total",
            reason: "empty".into(),
        };
        assert!(err.to_string().contains("http_requests_total"));
    }
}
