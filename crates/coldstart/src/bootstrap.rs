//! Wiring the engine from configuration for hosts that want the defaults.

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use coldstart_config::Config;

use crate::clock::{ClockAnchor, SystemClock};
use crate::lifecycle::{LifecycleSource, UpgradeSource};
use crate::process::ProcessInfoProvider;
use crate::reporter::TracingStartupReporter;
use crate::scheduler::Scheduler;
use crate::startup::{AppStart, Collaborators, Settings};
use crate::store::{FileStore, StoreError};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");
const PROGRAM_NAME: &str = "coldstart";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the instrumentation configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader reading configuration files and `COLDSTART_*` variables.
///
/// Command-line arguments belong to the host, so only the program name is
/// handed to the command-line layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let program = std::env::args_os()
            .next()
            .unwrap_or_else(|| OsString::from(PROGRAM_NAME));
        Config::load_from_iter([program])
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Loader that always yields `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The store directory could not be created.
    #[error("failed to prepare store directory '{path}': {source}")]
    StoreDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The durable store could not be opened.
    #[error("failed to open store: {source}")]
    Store {
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

/// Collaborators only the host can provide.
#[derive(Clone)]
pub struct HostBindings {
    /// Resolves process identity and age.
    pub process: Arc<dyn ProcessInfoProvider>,
    /// Delivers visibility changes.
    pub lifecycle: Arc<dyn LifecycleSource>,
    /// Delivers install and upgrade detection.
    pub upgrades: Arc<dyn UpgradeSource>,
    /// Coordination thread scheduler.
    pub scheduler: Arc<dyn Scheduler>,
}

/// Result of a successful bootstrap.
#[derive(Debug)]
pub struct Instrumentation {
    config: Config,
    telemetry: TelemetryHandle,
    app_start: AppStart,
}

impl Instrumentation {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// The engine, not yet initialized.
    #[must_use]
    pub fn app_start(&self) -> &AppStart {
        &self.app_start
    }

    /// Consumes the bootstrap result, keeping the engine.
    #[must_use]
    pub fn into_app_start(self) -> AppStart {
        self.app_start
    }
}

/// Bootstraps with [`SystemConfigLoader`].
///
/// # Errors
///
/// See [`bootstrap_with`].
pub fn bootstrap(bindings: HostBindings) -> Result<Instrumentation, BootstrapError> {
    bootstrap_with(&SystemConfigLoader, bindings)
}

/// Loads configuration, installs telemetry, opens the durable store, and
/// builds an engine wired with the system clock and the tracing reporter.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, the log filter, or the
/// store cannot be set up. A subscriber already installed by the host is
/// reused rather than treated as an error.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    bindings: HostBindings,
) -> Result<Instrumentation, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let store_path = config.store_path();
    let store = match open_store(&store_path) {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(
                target: BOOTSTRAP_TARGET,
                event = "bootstrap_failed",
                error = %error,
                "startup instrumentation bootstrap failed"
            );
            return Err(error);
        }
    };

    let collaborators = Collaborators {
        process: bindings.process,
        lifecycle: bindings.lifecycle,
        upgrades: bindings.upgrades,
        scheduler: bindings.scheduler,
        store: Arc::new(store),
        clock: Arc::new(SystemClock),
        reporter: Arc::new(TracingStartupReporter::new()),
        anchor: ClockAnchor::captured(),
    };
    let settings = Settings::from_config(&config);
    tracing::info!(
        target: BOOTSTRAP_TARGET,
        event = "bootstrap_succeeded",
        store = %store_path,
        heartbeat_ms = crate::clock::millis(settings.heartbeat_interval),
        off_thread_policy = %settings.off_thread_policy,
        host_subscriber = !telemetry.is_installed(),
        "startup instrumentation bootstrapped"
    );

    Ok(Instrumentation {
        config,
        telemetry,
        app_start: AppStart::new(collaborators, settings),
    })
}

fn open_store(path: &Utf8Path) -> Result<FileStore, BootstrapError> {
    prepare_store_directory(path)?;
    FileStore::open(path.as_std_path()).map_err(|source| BootstrapError::Store { source })
}

fn prepare_store_directory(path: &Utf8Path) -> Result<(), BootstrapError> {
    let Some(directory) = path.parent().filter(|parent| !parent.as_str().is_empty()) else {
        return Ok(());
    };
    std::fs::create_dir_all(directory).map_err(|source| BootstrapError::StoreDirectory {
        path: directory.to_path_buf(),
        source,
    })
}
