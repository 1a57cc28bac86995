use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;

#[cfg(unix)]
use dirs::data_local_dir;

use crate::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default period between "still alive" heartbeats written to the store.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Directory name created under the platform data directory.
pub const STORE_DIRECTORY_NAME: &str = "coldstart";

/// File name of the durable startup state store.
pub const STORE_FILE_NAME: &str = "startup-state.json";

/// Default logging format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default location of the durable startup state store.
pub fn default_store_path() -> Utf8PathBuf {
    let mut base = data_base_directory().unwrap_or_else(fallback_base_directory);
    base.push(STORE_DIRECTORY_NAME);
    base.push(STORE_FILE_NAME);
    base
}

#[cfg(unix)]
fn data_base_directory() -> Option<Utf8PathBuf> {
    data_local_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(not(unix))]
fn data_base_directory() -> Option<Utf8PathBuf> {
    None
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
