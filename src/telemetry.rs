//! Logging and the sidecar's own metrics exporter.
//!
//! `RUST_LOG` takes precedence over the configured log level. With the
//! `prometheus` feature the sidecar can expose its own counters (discovery
//! liveness, DNS requests, shutdowns) on a separate listener.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Install the global subscriber and, if configured, the metrics exporter.
pub fn init(config: &TelemetryConfig) -> Result<(), InitError> {
    tracing_subscriber::registry()
        .with(filter(config)?)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    match config.prometheus_addr {
        #[cfg(feature = "prometheus")]
        Some(addr) => {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()?;
            tracing::info!(%addr, "sidecar metrics exporter listening");
        }
        #[cfg(not(feature = "prometheus"))]
        Some(addr) => {
            tracing::warn!(%addr, "prometheus_addr ignored: built without the `prometheus` feature");
        }
        None => {}
    }

    Ok(())
}

/// Log filter from `RUST_LOG`, falling back to the configured level.
///
/// An unparsable configured level is an error rather than a silent default.
fn filter(config: &TelemetryConfig) -> Result<EnvFilter, InitError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(&config.log_level)?)
}
