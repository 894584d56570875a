//! Trace provider setup and the span helper.
//!
//! Configures:
//! - OTLP/gRPC span export over the shared collector channel
//! - Batch span processing with an always-on sampler
//! - W3C Trace Context + Baggage propagation
//!
//! Any failure installs a no-op tracer provider instead.

use std::borrow::Cow;
use std::panic::Location;

use opentelemetry::global;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::noop::{NoopTracer, NoopTracerProvider};
use opentelemetry::trace::{SpanBuilder, SpanKind, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithTonicConfig};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{BatchSpanProcessor, Sampler, SdkTracerProvider};

use super::ProviderGuard;
use crate::error::{Result, TelemetryError};
use crate::resource::build_resource;
use crate::telemetry::Telemetry;

/// Name given to spans started while tracing is unavailable.
pub const NOOP_SPAN_NAME: &str = "noop";

/// Options for [`Telemetry::start_span_with`].
///
/// Without an explicit name the span is named after the caller's source
/// location.
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    name: Option<Cow<'static, str>>,
    kind: Option<SpanKind>,
    attributes: Vec<KeyValue>,
}

impl SpanOptions {
    /// Options for a span with an explicit name.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

impl Telemetry {
    /// Build and register the trace provider for `service_name`.
    ///
    /// On success the provider becomes the process-wide default, the
    /// composite propagator is registered, and a tracer bound to
    /// `service_name` becomes this context's active tracer.
    ///
    /// On any failure a no-op tracer provider is registered instead and
    /// `None` is returned together with a no-op guard. Failures are logged,
    /// never returned.
    pub fn setup_tracing(&self, service_name: &str) -> (Option<SdkTracerProvider>, ProviderGuard) {
        if self.tracer().is_some() {
            tracing::warn!(service = service_name, "Tracing already set up, ignoring");
            return (None, ProviderGuard::noop());
        }

        match self.build_tracer_provider(service_name) {
            Ok(provider) => {
                let guard = self.install_tracer_provider(provider.clone(), service_name);
                if guard.is_noop() {
                    (None, guard)
                } else {
                    tracing::info!(service = service_name, "Tracing initialized");
                    (Some(provider), guard)
                }
            }
            Err(e) => {
                tracing::warn!(
                    service = service_name,
                    error = %e,
                    "Tracing unavailable, using no-op tracer"
                );
                global::set_tracer_provider(NoopTracerProvider::new());
                (None, ProviderGuard::noop())
            }
        }
    }

    /// Register a caller-built trace provider as this context's tracer.
    ///
    /// Use this to export through something other than the OTLP collector.
    /// Returns a no-op guard if a tracer is already installed.
    pub fn install_tracer_provider(
        &self,
        provider: SdkTracerProvider,
        service_name: &str,
    ) -> ProviderGuard {
        if !self.set_tracer(provider.tracer(service_name.to_string())) {
            tracing::warn!(service = service_name, "Tracer already installed, ignoring provider");
            return ProviderGuard::noop();
        }

        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(composite_propagator());

        ProviderGuard::tracer(provider)
    }

    fn build_tracer_provider(&self, service_name: &str) -> Result<SdkTracerProvider> {
        let collector = self.connection().acquire()?;

        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_channel(collector.channel())
            .build()
            .map_err(|e| TelemetryError::ExporterBuildFailed(e.to_string()))?;

        let resource = build_resource(service_name, self.config())?;

        let processor = BatchSpanProcessor::builder(exporter).build();

        Ok(SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource)
            .with_span_processor(processor)
            .build())
    }

    /// Start a span named after the caller's source location.
    ///
    /// Returns a context whose active span is the new span; end it with
    /// `cx.span().end()`. Before tracing is set up the span is a no-op that
    /// performs no I/O.
    #[track_caller]
    pub fn start_span(&self, cx: &Context) -> Context {
        self.start_span_with(cx, SpanOptions::default())
    }

    /// Start a span with explicit options.
    ///
    /// Falls back to the caller's source location when `options` has no name.
    #[track_caller]
    pub fn start_span_with(&self, cx: &Context, options: SpanOptions) -> Context {
        let location = Location::caller();

        let Some(tracer) = self.tracer() else {
            let span = NoopTracer::new().start_with_context(NOOP_SPAN_NAME, cx);
            return cx.with_span(span);
        };

        let name = options.name.unwrap_or_else(|| caller_span_name(location));
        let mut builder = SpanBuilder::from_name(name).with_attributes(options.attributes);
        if let Some(kind) = options.kind {
            builder = builder.with_kind(kind);
        }

        let span = tracer.build_with_context(builder, cx);
        cx.with_span(span)
    }
}

/// `file:line` of the code that asked for a span.
fn caller_span_name(location: &Location<'_>) -> Cow<'static, str> {
    Cow::Owned(format!("{}:{}", location.file(), location.line()))
}

/// W3C Trace Context plus Baggage.
fn composite_propagator() -> TextMapCompositePropagator {
    let propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = vec![
        Box::new(BaggagePropagator::new()),
        Box::new(TraceContextPropagator::new()),
    ];
    TextMapCompositePropagator::new(propagators)
}
