//! Telemetry module
//!
//! Logging and Prometheus metrics, initialized once at startup and passed
//! in through configuration rather than hidden globals.

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{
    record_fill, record_order_placed, record_rollover, record_stream_connected,
    record_stream_reconnect, record_tick,
};

use crate::config::TelemetryConfig;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Guard that ties telemetry lifetime to the process
pub struct TelemetryGuard {
    _priv: (),
}

/// Initialize all telemetry subsystems
///
/// Metrics export is skipped when `metrics_port` is 0.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    init_logging(&config.log_level, LogFormat::parse(&config.log_format))?;

    if config.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics_port))
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
        tracing::info!(port = config.metrics_port, "metrics exporter listening");
    }

    Ok(TelemetryGuard { _priv: () })
}
