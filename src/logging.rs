//! Tracing subscriber setup

use crate::config::MonitoringConfig;
use crate::metrics;
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber
///
/// `RUST_LOG` wins over the configured level. Returns `false` when a
/// subscriber was already installed, which is harmless.
pub fn init_tracing(config: &MonitoringConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json_logs {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Install tracing and apply the metrics switch
pub fn init_monitoring(config: &MonitoringConfig) {
    init_tracing(config);
    metrics::set_enabled(config.metrics_enabled);
}
