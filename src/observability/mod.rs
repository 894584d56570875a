//! OpenTelemetry observability infrastructure.
//!
//! Provides:
//! - Trace provider setup with OTLP export and no-op fallback
//! - Meter provider setup and the shared request instruments
//! - Console logging bridged into OpenTelemetry traces

pub mod logging;
pub mod metrics;
pub mod trace;

use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Flushes and closes a provider built by one of the setup functions.
///
/// Failed setups hand back a no-op guard, so callers can always shut down
/// unconditionally.
#[must_use = "call shutdown() at teardown to flush pending telemetry"]
#[derive(Debug)]
pub struct ProviderGuard {
    provider: Provider,
}

#[derive(Debug)]
enum Provider {
    Noop,
    Tracer(SdkTracerProvider),
    Meter(SdkMeterProvider),
}

impl ProviderGuard {
    /// A guard whose shutdown does nothing.
    pub fn noop() -> Self {
        Self {
            provider: Provider::Noop,
        }
    }

    pub(crate) fn tracer(provider: SdkTracerProvider) -> Self {
        Self {
            provider: Provider::Tracer(provider),
        }
    }

    pub(crate) fn meter(provider: SdkMeterProvider) -> Self {
        Self {
            provider: Provider::Meter(provider),
        }
    }

    /// Whether this guard has nothing to flush.
    pub fn is_noop(&self) -> bool {
        matches!(self.provider, Provider::Noop)
    }

    /// Flush pending signals and close the provider.
    ///
    /// Blocks until the flush completes. Errors are logged, never returned.
    /// From async code, run it on a multi-threaded runtime or inside
    /// `spawn_blocking`: the exporter needs the runtime to make progress.
    pub fn shutdown(self) {
        match self.provider {
            Provider::Noop => {}
            Provider::Tracer(provider) => match provider.shutdown() {
                Ok(()) => tracing::debug!("Tracer provider shut down"),
                Err(e) => tracing::warn!(error = %e, "Error shutting down tracer provider"),
            },
            Provider::Meter(provider) => match provider.shutdown() {
                Ok(()) => tracing::debug!("Meter provider shut down"),
                Err(e) => tracing::warn!(error = %e, "Error shutting down meter provider"),
            },
        }
    }
}
