//! Configuration shared by hosts embedding the coldstart instrumentation.
//!
//! Values are layered by [`ortho_config`]: configuration files first, then
//! `COLDSTART_*` environment variables, then command-line flags. Every field
//! is optional in each layer; the accessors on [`Config`] resolve the
//! effective value, falling back to the defaults in this crate.

mod defaults;
mod policy;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use defaults::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LOG_FILTER, STORE_DIRECTORY_NAME, STORE_FILE_NAME,
    default_log_format, default_store_path,
};
pub use policy::OffThreadPolicy;

/// How startup events are rendered when coldstart installs its own
/// subscriber.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, with checkpoint fields such as
    /// `elapsed_ms` at the top level for log pipelines.
    Json,
    /// Single human-readable line per event, for local debugging.
    Compact,
}

/// Resolved instrumentation configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "COLDSTART")]
pub struct Config {
    /// Tracing filter expression, for example `info` or `coldstart=debug`.
    pub log_filter: Option<String>,
    /// Output format for structured logs.
    pub log_format: Option<LogFormat>,
    /// Location of the durable key-value store holding prior-session state.
    pub store_path: Option<Utf8PathBuf>,
    /// Period, in milliseconds, between "still alive" heartbeats.
    pub heartbeat_interval_ms: Option<u64>,
    /// Behaviour when checkpoints are invoked off the coordination thread.
    pub off_thread_policy: Option<OffThreadPolicy>,
}

impl Config {
    /// Effective log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Effective log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Effective store location.
    #[must_use]
    pub fn store_path(&self) -> Utf8PathBuf {
        self.store_path.clone().unwrap_or_else(default_store_path)
    }

    /// Effective heartbeat period. A configured zero is clamped to one
    /// millisecond so the heartbeat never spins.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval_ms
            .map_or(DEFAULT_HEARTBEAT_INTERVAL, |millis| {
                Duration::from_millis(millis.max(1))
            })
    }

    /// Effective off-thread policy.
    #[must_use]
    pub fn off_thread_policy(&self) -> OffThreadPolicy {
        self.off_thread_policy
            .unwrap_or_else(OffThreadPolicy::for_build)
    }
}
