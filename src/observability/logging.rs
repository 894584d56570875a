//! Console logging setup.
//!
//! Configures structured logging with:
//! - Environment-based filter (via RUST_LOG or `--log-level`)
//! - Text or JSON console output
//! - An optional bridge that turns `tracing` spans into OpenTelemetry spans
//!
//! Telemetry setup logs its own failures, so it needs a subscriber before
//! the tracer it produces exists. [`bootstrap_logging`] covers that window
//! on the current thread; [`init_logging`] then installs the global
//! subscriber with the bridge attached.

use opentelemetry_sdk::trace::SdkTracer;
use tracing::subscriber::DefaultGuard;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{LogConfig, LogFormat};

/// Transport crates that are noisy at debug level.
const QUIET_DIRECTIVES: [&str; 4] = ["h2=warn", "hyper=warn", "tower=warn", "tonic=info"];

/// Initialize console logging.
///
/// This sets up:
/// - Console logging with target, thread ids and source location
/// - A level filter built from `config.log_level`
/// - When `tracer` is given, a layer exporting `tracing` spans through it
///
/// # Arguments
///
/// * `config` - Level and output format
/// * `tracer` - Tracer returned by a successful tracing setup
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig, tracer: Option<SdkTracer>) -> Result<(), TryInitError> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![fmt_layer(config.log_format, std::io::stdout)];

    if let Some(tracer) = tracer {
        layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&config.log_level))
        .try_init()
}

/// Console logging for the current thread only, until the guard drops.
///
/// Use it around telemetry setup, before [`init_logging`] can be called.
pub fn bootstrap_logging(config: &LogConfig) -> DefaultGuard {
    scoped_logging(config, std::io::stdout)
}

/// Like [`bootstrap_logging`], writing to `writer`.
pub fn scoped_logging<W>(config: &LogConfig, writer: W) -> DefaultGuard
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer(config.log_format, writer))
        .with(build_filter(&config.log_level));
    tracing::subscriber::set_default(subscriber)
}

fn fmt_layer<S, W>(format: LogFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

fn build_filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in QUIET_DIRECTIVES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize logging for tests (only logs errors).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
