//! Test utilities for Beacon integration tests.
//!
//! Provides:
//! - An in-memory metric pipeline bound to a fresh `Telemetry`
//! - Helpers to read back counter and histogram points by attribute
//! - An in-memory span pipeline for span helper tests

#![allow(dead_code)]

use beacon::{ProviderGuard, Telemetry};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{Histogram, ResourceMetrics, Sum};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// A telemetry context whose metrics land in memory.
pub struct MetricsHarness {
    pub telemetry: Telemetry,
    provider: SdkMeterProvider,
    exporter: InMemoryMetricExporter,
    guard: Option<ProviderGuard>,
}

/// One histogram data point, reduced to what tests assert on.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramPoint {
    pub count: u64,
    pub sum: f64,
}

impl MetricsHarness {
    /// Create a harness with the request instruments installed.
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();

        let telemetry = Telemetry::disabled();
        let guard = telemetry.install_meter_provider(provider.clone(), "beacon-test");
        assert!(!guard.is_noop(), "instruments should install on a fresh context");

        Self {
            telemetry,
            provider,
            exporter,
            guard: Some(guard),
        }
    }

    /// Flush and return the most recent export.
    ///
    /// The reader skips the export entirely while nothing has been recorded,
    /// so an idle pipeline yields `None`.
    fn latest(&self) -> Option<ResourceMetrics> {
        self.provider.force_flush().expect("flush metrics");
        self.exporter
            .get_finished_metrics()
            .expect("read metrics")
            .pop()
    }

    /// Counter value for the point whose attributes include `attrs`.
    pub fn counter_value(&self, attrs: &[KeyValue]) -> Option<u64> {
        let metrics = self.latest()?;
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == REQUESTS_TOTAL)
            .filter_map(|metric| metric.data.as_any().downcast_ref::<Sum<u64>>())
            .flat_map(|sum| sum.data_points.iter())
            .find(|point| contains_all(&point.attributes, attrs))
            .map(|point| point.value)
    }

    /// Histogram point whose attributes include `attrs`.
    pub fn histogram_point(&self, attrs: &[KeyValue]) -> Option<HistogramPoint> {
        let metrics = self.latest()?;
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == REQUEST_DURATION_SECONDS)
            .filter_map(|metric| metric.data.as_any().downcast_ref::<Histogram<f64>>())
            .flat_map(|histogram| histogram.data_points.iter())
            .find(|point| contains_all(&point.attributes, attrs))
            .map(|point| HistogramPoint {
                count: point.count,
                sum: point.sum,
            })
    }

    /// Every attribute set recorded on the counter.
    pub fn counter_attribute_sets(&self) -> Vec<Vec<KeyValue>> {
        let Some(metrics) = self.latest() else {
            return Vec::new();
        };
        metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter())
            .filter(|metric| metric.name == REQUESTS_TOTAL)
            .filter_map(|metric| metric.data.as_any().downcast_ref::<Sum<u64>>())
            .flat_map(|sum| sum.data_points.iter())
            .map(|point| point.attributes.clone())
            .collect()
    }
}

impl Default for MetricsHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MetricsHarness {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.shutdown();
        }
    }
}

/// A telemetry context whose spans land in memory.
pub struct SpanHarness {
    pub telemetry: Telemetry,
    provider: SdkTracerProvider,
    exporter: InMemorySpanExporter,
}

impl SpanHarness {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();

        let telemetry = Telemetry::disabled();
        let guard = telemetry.install_tracer_provider(provider.clone(), "beacon-test");
        assert!(!guard.is_noop(), "tracer should install on a fresh context");
        // The harness keeps its own handle to the provider
        drop(guard);

        Self {
            telemetry,
            provider,
            exporter,
        }
    }

    /// Spans ended so far.
    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.provider.force_flush().expect("flush spans");
        self.exporter.get_finished_spans().expect("read spans")
    }
}

impl Default for SpanHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_all(haystack: &[KeyValue], needles: &[KeyValue]) -> bool {
    needles.iter().all(|needle| haystack.contains(needle))
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
