//! Beacon: an HTTP service instrumented with OpenTelemetry.
//!
//! # Usage
//!
//! ```bash
//! OTEL_ENABLE=true OTEL_COLLECTOR_ENDPOINT=localhost:4317 beacon --port 8080
//! ```
//!
//! Environment variables can also be used:
//! - `BEACON_PORT`: Port to listen on
//! - `OTEL_ENABLE`: Must be exactly `true` to export telemetry
//! - `OTEL_COLLECTOR_ENDPOINT`: Collector address (host:port)
//! - `SERVICE_VERSION`, `ENV`: Attached to every exported signal
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context as _;
use beacon::config::Config;
use beacon::observability::logging::{bootstrap_logging, init_logging};
use beacon::server::run_server;
use beacon::Telemetry;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let endpoint = config.telemetry.endpoint().unwrap_or("-");
    eprintln!(
        r#"
  Beacon v{} - OpenTelemetry demo service

  Configuration:
    Address:    {}:{}
    Service:    {}
    Telemetry:  {} ({})
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.host,
        config.port,
        config.service_name,
        if config.telemetry.is_enabled() { "enabled" } else { "disabled" },
        endpoint,
        config.log.log_level
    );
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown...");
                    }
                }
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    }

    if let Err(e) = ctrl_c.await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, initiating shutdown...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize telemetry; failures are logged and fall back to no-op providers
    let telemetry = Telemetry::new(config.telemetry.clone());
    let (tracing_guard, metrics_guard) = {
        let _logging = bootstrap_logging(&config.log);
        let (_, tracing_guard) = telemetry.setup_tracing(&config.service_name);
        (tracing_guard, telemetry.setup_metrics(&config.service_name))
    };

    // Initialize logging, bridged into traces when tracing is up
    init_logging(&config.log, telemetry.tracer()).context("failed to initialize logging")?;

    // Print startup banner
    print_banner(&config);

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn signal handler task
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Run the server
    let served = run_server(&config, telemetry, shutdown_rx)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("server failed");

    // Flush telemetry; shutdown blocks on the exporters
    let flush = tokio::task::spawn_blocking(move || {
        tracing_guard.shutdown();
        metrics_guard.shutdown();
    });
    if tokio::time::timeout(config.shutdown_grace(), flush).await.is_err() {
        tracing::warn!(
            grace_secs = config.shutdown_grace_secs,
            "Telemetry flush timed out"
        );
    }

    served?;
    tracing::info!("Beacon shutdown complete");
    Ok(())
}
