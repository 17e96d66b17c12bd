//! Tracing setup for hosts and tests
//!
//! The library itself only emits `tracing` events. Binaries and test
//! harnesses that want to see them call [`init`] once; later calls are
//! harmless no-ops that report whether a subscriber was already set.

use crate::config::{LogFormat, NvsConfig};
use crate::error::{Error, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_filter: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", default_filter, e))),
    }
}

/// Install a console subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
///
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init(default_filter: &str) -> Result<bool> {
    init_with_format(default_filter, LogFormat::Pretty)
}

pub fn init_with_format(default_filter: &str, format: LogFormat) -> Result<bool> {
    let filter = filter(default_filter)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    }
    .is_ok();
    Ok(installed)
}

/// Install a subscriber using [`NvsConfig::log_filter`] and [`NvsConfig::log_format`]
pub fn init_from_config(config: &NvsConfig) -> Result<bool> {
    init_with_format(&config.log_filter, config.log_format)
}
