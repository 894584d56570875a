//! Configuration parsing for Beacon.
//!
//! Supports:
//! - Telemetry settings read from the environment (`OTEL_ENABLE`,
//!   `OTEL_COLLECTOR_ENDPOINT`, `SERVICE_VERSION`, `ENV`)
//! - CLI arguments via clap for the demo server
//! - Sensible defaults for quick start

use std::time::Duration;

use clap::{Args, Parser, ValueEnum};

/// The only enablement value that turns telemetry on. Compared case-sensitively.
pub const ENABLED_VALUE: &str = "true";

/// Telemetry settings shared by every setup call.
///
/// Values are read once when the struct is built and never re-read.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Enable telemetry export (must be exactly "true")
    #[arg(long = "otel-enable", env = "OTEL_ENABLE")]
    pub enable: Option<String>,

    /// OpenTelemetry collector endpoint (host:port)
    #[arg(long = "otel-collector-endpoint", env = "OTEL_COLLECTOR_ENDPOINT")]
    pub collector_endpoint: Option<String>,

    /// Service version attached to every signal
    #[arg(long, env = "SERVICE_VERSION", default_value = "")]
    pub service_version: String,

    /// Deployment environment attached to every signal (local, dev, prod)
    #[arg(long = "environment", env = "ENV", default_value = "")]
    pub environment: String,
}

/// Parser used to read [`TelemetryConfig`] from the environment alone.
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct EnvTelemetry {
    #[command(flatten)]
    telemetry: TelemetryConfig,
}

impl TelemetryConfig {
    /// Read the telemetry settings from the process environment.
    pub fn from_env() -> Self {
        match EnvTelemetry::try_parse_from(std::iter::empty::<String>()) {
            Ok(parsed) => parsed.telemetry,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid telemetry environment, telemetry disabled");
                Self::default()
            }
        }
    }

    /// Configuration with telemetry switched on for the given endpoint.
    pub fn enabled(endpoint: impl Into<String>) -> Self {
        Self {
            enable: Some(ENABLED_VALUE.to_string()),
            collector_endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    /// Whether the enablement flag carries the exact affirmative value.
    pub fn flag_enabled(&self) -> bool {
        self.enable.as_deref() == Some(ENABLED_VALUE)
    }

    /// The configured collector endpoint, if it is non-empty.
    pub fn endpoint(&self) -> Option<&str> {
        self.collector_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Reports whether telemetry should be activated at all.
    ///
    /// True only when the flag is exactly `true` and an endpoint is set.
    pub fn is_enabled(&self) -> bool {
        self.flag_enabled() && self.endpoint().is_some()
    }
}

/// Output format for console logs.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Console logging settings.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

/// Beacon demo server: an HTTP service instrumented with OpenTelemetry.
#[derive(Parser, Debug, Clone)]
#[command(name = "beacon")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "BEACON_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "BEACON_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Service name reported in traces and metrics
    #[arg(long, env = "SERVICE_NAME", default_value = "beacon")]
    pub service_name: String,

    /// Seconds to wait for telemetry to flush at shutdown
    #[arg(long, env = "BEACON_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    #[command(flatten)]
    pub log: LogConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Upper bound on the telemetry flush at shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Create a default configuration for testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            service_name: "beacon-test".into(),
            shutdown_grace_secs: 1,
            log: LogConfig {
                log_level: "debug".into(),
                log_format: LogFormat::Text,
            },
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            service_name: "beacon".into(),
            shutdown_grace_secs: 10,
            log: LogConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
