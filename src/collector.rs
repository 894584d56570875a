//! Memoized gRPC channel to the OpenTelemetry collector.
//!
//! Both the trace and the metric exporters ride on the same channel. The
//! channel is created on first successful acquisition and handed back
//! unchanged afterwards: no pooling, no health check, no reconnection.

use std::sync::Arc;

use parking_lot::Mutex;
use tonic::transport::{Channel, Endpoint};

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};

/// A live channel to the collector.
#[derive(Debug)]
pub struct CollectorChannel {
    endpoint: String,
    channel: Channel,
}

impl CollectorChannel {
    /// The URI the channel was opened against.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A handle to the underlying tonic channel.
    ///
    /// Tonic channels are cheap to clone and share one connection.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

/// Establishes and memoizes the collector channel.
#[derive(Debug)]
pub struct ConnectionManager {
    config: TelemetryConfig,
    channel: Mutex<Option<Arc<CollectorChannel>>>,
}

impl ConnectionManager {
    /// Create a manager for the given configuration. Nothing is opened yet.
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            channel: Mutex::new(None),
        }
    }

    /// Return the collector channel, opening it on first use.
    ///
    /// The lock is held across check-then-create so concurrent first callers
    /// all receive the same channel.
    ///
    /// # Errors
    ///
    /// - [`TelemetryError::Disabled`] if `OTEL_ENABLE` is not exactly `true`
    /// - [`TelemetryError::MissingEndpoint`] if no endpoint is configured
    /// - [`TelemetryError::ConnectionFailed`] if the channel cannot be created
    pub fn acquire(&self) -> Result<Arc<CollectorChannel>> {
        let mut slot = self.channel.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }

        if !self.config.flag_enabled() {
            return Err(TelemetryError::Disabled(self.config.enable.clone()));
        }

        let endpoint = self
            .config
            .endpoint()
            .ok_or(TelemetryError::MissingEndpoint)?;

        let opened = Arc::new(open_channel(endpoint)?);
        tracing::info!(endpoint = %opened.endpoint, "Collector channel created");

        *slot = Some(Arc::clone(&opened));
        Ok(opened)
    }

    /// Whether a channel has been created.
    pub fn is_connected(&self) -> bool {
        self.channel.lock().is_some()
    }
}

/// Open a lazily-connecting, plaintext channel to `endpoint`.
fn open_channel(endpoint: &str) -> Result<CollectorChannel> {
    // The channel's connection task is spawned onto the current runtime.
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(TelemetryError::ConnectionFailed(
            "no Tokio runtime available".to_string(),
        ));
    }

    let uri = collector_uri(endpoint);
    let channel = Endpoint::from_shared(uri.clone())
        .map_err(|e| TelemetryError::ConnectionFailed(format!("{uri}: {e}")))?
        .connect_lazy();

    Ok(CollectorChannel {
        endpoint: uri,
        channel,
    })
}

/// Turn a `host:port` address into a URI tonic accepts.
fn collector_uri(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}
