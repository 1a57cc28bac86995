//! Structured logging for the instrumentation.
//!
//! Most hosts install their own subscriber before bootstrapping; coldstart
//! events then flow into it unchanged. Only when nothing is installed does
//! [`initialise`] set up a stderr subscriber from [`Config`].

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use coldstart_config::{Config, LogFormat};

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static TELEMETRY: OnceCell<TelemetryHandle> = OnceCell::new();

/// Who owns the global subscriber that receives coldstart events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryHandle {
    /// coldstart installed its own subscriber from the configuration.
    Installed,
    /// The host had already installed a subscriber; the configured filter
    /// and format were not applied.
    HostProvided,
}

impl TelemetryHandle {
    /// Whether the configured filter and format are in effect.
    #[must_use]
    pub const fn is_installed(self) -> bool {
        matches!(self, Self::Installed)
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Expression as configured.
        filter: String,
        /// Parser message.
        message: String,
    },
}

/// Sets up logging once per process and returns the same handle afterwards.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when coldstart would install its own
/// subscriber and the configured filter is invalid.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY
        .get_or_try_init(|| install_subscriber(config))
        .copied()
}

fn install_subscriber(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    if tracing::dispatcher::has_been_set() {
        return Ok(host_provided());
    }

    let filter = build_filter(config)?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    // Another thread may win the race after the check above.
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return Ok(host_provided());
    }
    tracing::debug!(
        target: TELEMETRY_TARGET,
        event = "subscriber_installed",
        filter = config.log_filter(),
        format = %config.log_format(),
        "coldstart telemetry installed"
    );
    Ok(TelemetryHandle::Installed)
}

fn build_filter(config: &Config) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
        filter: config.log_filter().to_owned(),
        message: error.to_string(),
    })
}

fn host_provided() -> TelemetryHandle {
    tracing::debug!(
        target: TELEMETRY_TARGET,
        event = "host_subscriber_in_use",
        "logging through the host's subscriber"
    );
    TelemetryHandle::HostProvided
}
