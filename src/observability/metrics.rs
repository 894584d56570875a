//! OTLP metrics and the shared request instruments.
//!
//! Key metrics:
//! - http_requests_total: Counter for handled requests
//! - http_request_duration_seconds: Histogram for request latency
//!
//! Both are recorded by the HTTP middleware and the gRPC interceptors with
//! the same attribute keys.

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
use opentelemetry::{global, InstrumentationScope, KeyValue};
use opentelemetry_otlp::{MetricExporter, WithTonicConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

use super::ProviderGuard;
use crate::error::{Result, TelemetryError};
use crate::resource::build_resource;
use crate::telemetry::Telemetry;

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Histogram bucket boundaries, in seconds.
pub const DURATION_BUCKETS: [f64; 12] = [
    0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 2.0, 5.0,
];

pub const ATTR_METHOD: &str = "method";
pub const ATTR_PATH: &str = "path";
pub const ATTR_STATUS_CODE: &str = "status_code";

/// The counter/histogram pair shared by every wrapper.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Total number of handled requests.
    pub requests_total: Counter<u64>,
    /// Request duration in seconds.
    pub request_duration: Histogram<f64>,
}

impl RequestMetrics {
    /// Create both instruments from a meter with the default buckets.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InstrumentBuildFailed`] if an instrument
    /// definition is invalid. Nothing is created in that case.
    pub fn new(meter: &Meter) -> Result<Self> {
        Self::with_boundaries(meter, &DURATION_BUCKETS)
    }

    /// Create both instruments, bucketing durations at `boundaries` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InstrumentBuildFailed`] if `boundaries` are
    /// not finite and strictly increasing.
    pub fn with_boundaries(meter: &Meter, boundaries: &[f64]) -> Result<Self> {
        // The SDK applies the same rules but only logs and hands back a
        // no-op instrument, so check up front to surface an error.
        validate_instrument_name(REQUESTS_TOTAL)?;
        validate_instrument_name(REQUEST_DURATION_SECONDS)?;
        validate_boundaries(REQUEST_DURATION_SECONDS, boundaries)?;

        Ok(Self {
            requests_total: meter
                .u64_counter(REQUESTS_TOTAL)
                .with_description("Total number of HTTP requests")
                .build(),
            request_duration: meter
                .f64_histogram(REQUEST_DURATION_SECONDS)
                .with_description("HTTP request duration in seconds")
                .with_unit("s")
                .with_boundaries(boundaries.to_vec())
                .build(),
        })
    }

    /// Count one request and record its duration.
    pub fn record(&self, elapsed: Duration, attributes: &[KeyValue]) {
        self.requests_total.add(1, attributes);
        self.request_duration
            .record(elapsed.as_secs_f64(), attributes);
    }
}

/// Attributes for an inbound HTTP request.
pub fn http_attributes(method: &str, path: &str, status: u16) -> [KeyValue; 3] {
    [
        KeyValue::new(ATTR_METHOD, method.to_string()),
        KeyValue::new(ATTR_PATH, path.to_string()),
        KeyValue::new(ATTR_STATUS_CODE, i64::from(status)),
    ]
}

/// Attributes for an RPC, keyed by its full method name.
pub fn rpc_attributes(full_method: &str, code: tonic::Code) -> [KeyValue; 2] {
    [
        KeyValue::new(ATTR_METHOD, full_method.to_string()),
        KeyValue::new(ATTR_STATUS_CODE, i64::from(i32::from(code))),
    ]
}

/// Check a name against the OpenTelemetry instrument naming rules.
fn validate_instrument_name(name: &'static str) -> Result<()> {
    let invalid = |reason: &str| TelemetryError::InstrumentBuildFailed {
        name,
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name is empty")),
        Some(first) if !first.is_ascii_alphabetic() => {
            return Err(invalid("name must start with a letter"))
        }
        Some(_) => {}
    }
    if name.len() > 255 {
        return Err(invalid("name longer than 255 characters"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')) {
        return Err(invalid("name contains invalid characters"));
    }
    Ok(())
}

/// Bucket boundaries must be finite and strictly increasing.
fn validate_boundaries(name: &'static str, boundaries: &[f64]) -> Result<()> {
    if boundaries.iter().any(|b| !b.is_finite()) {
        return Err(TelemetryError::InstrumentBuildFailed {
            name,
            reason: "bucket boundaries must be finite".to_string(),
        });
    }
    if boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(TelemetryError::InstrumentBuildFailed {
            name,
            reason: "bucket boundaries must be strictly increasing".to_string(),
        });
    }
    Ok(())
}

impl Telemetry {
    /// Build and register the meter provider for `service_name`.
    ///
    /// On success the provider becomes the process-wide default and the
    /// request instruments are installed on this context. On any failure the
    /// instruments stay unset, every wrapper skips recording, and a no-op
    /// guard is returned. Failures are logged, never returned.
    pub fn setup_metrics(&self, service_name: &str) -> ProviderGuard {
        if self.request_metrics().is_some() {
            tracing::warn!(service = service_name, "Metrics already set up, ignoring");
            return ProviderGuard::noop();
        }

        match self.build_meter_provider(service_name) {
            Ok(provider) => {
                let guard = self.install_meter_provider(provider, service_name);
                if !guard.is_noop() {
                    tracing::info!(service = service_name, "Metrics initialized");
                }
                guard
            }
            Err(e) => {
                tracing::warn!(
                    service = service_name,
                    error = %e,
                    "Metrics unavailable, request metrics will not be recorded"
                );
                ProviderGuard::noop()
            }
        }
    }

    /// Register a caller-built meter provider and create the instruments.
    ///
    /// Use this to export through something other than the OTLP collector.
    /// Returns a no-op guard if the instruments cannot be created or are
    /// already installed.
    pub fn install_meter_provider(
        &self,
        provider: SdkMeterProvider,
        service_name: &str,
    ) -> ProviderGuard {
        let scope = InstrumentationScope::builder(service_name.to_string()).build();
        let meter = provider.meter_with_scope(scope);

        let metrics = match RequestMetrics::new(&meter) {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!(service = service_name, error = %e, "Failed to create instruments");
                return ProviderGuard::noop();
            }
        };

        if !self.set_request_metrics(metrics) {
            tracing::warn!(service = service_name, "Instruments already installed, ignoring provider");
            return ProviderGuard::noop();
        }

        global::set_meter_provider(provider.clone());
        ProviderGuard::meter(provider)
    }

    fn build_meter_provider(&self, service_name: &str) -> Result<SdkMeterProvider> {
        let collector = self.connection().acquire()?;

        let exporter = MetricExporter::builder()
            .with_tonic()
            .with_channel(collector.channel())
            .build()
            .map_err(|e| TelemetryError::ExporterBuildFailed(e.to_string()))?;

        let resource = build_resource(service_name, self.config())?;

        Ok(SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter).build())
            .with_resource(resource)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;

    #[test]
    fn test_instrument_names_are_valid() {
        validate_instrument_name(REQUESTS_TOTAL).unwrap();
        validate_instrument_name(REQUEST_DURATION_SECONDS).unwrap();
        validate_boundaries(REQUEST_DURATION_SECONDS, &DURATION_BUCKETS).unwrap();
    }

    #[test]
    fn test_invalid_instrument_names() {
        assert!(validate_instrument_name("").is_err());
        assert!(validate_instrument_name("1requests").is_err());
        assert!(validate_instrument_name("requests total").is_err());
    }

    #[test]
    fn test_invalid_boundaries() {
        assert!(validate_boundaries("h", &[0.1, 0.1]).is_err());
        assert!(validate_boundaries("h", &[0.5, 0.2]).is_err());
        assert!(validate_boundaries("h", &[0.1, f64::NAN]).is_err());
        assert!(validate_boundaries("h", &[]).is_ok());
    }

    #[test]
    fn test_bad_boundaries_fail_instrument_build() {
        use opentelemetry::metrics::MeterProvider as _;

        let provider = SdkMeterProvider::builder().build();
        let meter = provider.meter("beacon-test");

        let err = RequestMetrics::with_boundaries(&meter, &[0.5, 0.25]).unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::InstrumentBuildFailed {
                name: REQUEST_DURATION_SECONDS,
                ..
            }
        ));

        assert!(RequestMetrics::with_boundaries(&meter, &[0.01, 0.05, 0.25]).is_ok());
    }

    #[test]
    fn test_http_attributes() {
        let attrs = http_attributes("GET", "/users/7", 404);
        assert_eq!(attrs[0], KeyValue::new(ATTR_METHOD, "GET"));
        assert_eq!(attrs[1], KeyValue::new(ATTR_PATH, "/users/7"));
        assert_eq!(attrs[2], KeyValue::new(ATTR_STATUS_CODE, 404_i64));
    }

    #[test]
    fn test_rpc_attributes() {
        let attrs = rpc_attributes("/pkg.Service/Method", tonic::Code::NotFound);
        assert_eq!(attrs[0], KeyValue::new(ATTR_METHOD, "/pkg.Service/Method"));
        assert_eq!(attrs[1], KeyValue::new(ATTR_STATUS_CODE, 5_i64));
    }

    #[test]
    fn test_setup_metrics_disabled_leaves_instruments_unset() {
        let telemetry = Telemetry::new(TelemetryConfig {
            enable: Some("false".into()),
            collector_endpoint: Some("127.0.0.1:4317".into()),
            ..TelemetryConfig::default()
        });

        let guard = telemetry.setup_metrics("svc");

        assert!(guard.is_noop());
        assert!(telemetry.request_metrics().is_none());
        assert!(!telemetry.connection().is_connected());
        guard.shutdown();
    }

    #[test]
    fn test_install_meter_provider_once() {
        let telemetry = Telemetry::disabled();

        let first = telemetry.install_meter_provider(SdkMeterProvider::builder().build(), "svc");
        assert!(!first.is_noop());
        assert!(telemetry.request_metrics().is_some());

        let second = telemetry.install_meter_provider(SdkMeterProvider::builder().build(), "svc");
        assert!(second.is_noop());

        // Recording without a reader should not panic
        telemetry.record_request(Duration::from_millis(3), &rpc_attributes("/a/b", tonic::Code::Ok));
        first.shutdown();
    }
}
