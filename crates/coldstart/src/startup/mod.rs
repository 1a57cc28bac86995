//! The startup instrumentation engine.
//!
//! [`AppStart`] is the process-wide context object. Hosts build it once with
//! their collaborators, call [`AppStart::init`] on the coordination thread, and
//! hand clones to any code that records checkpoints or reads the record.
//!
//! Every write happens on the coordination thread: scheduler callbacks run
//! there, and the public checkpoint operations refuse to run anywhere else.
//! Reads go through the lock-free [`RecordSlot`] and are safe from any thread.

mod checkpoints;
mod errors;
mod heartbeat;
mod visibility;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use coldstart_config::{Config, DEFAULT_HEARTBEAT_INTERVAL, OffThreadPolicy};
use once_cell::sync::OnceCell;

use crate::clock::{self, Clock, ClockAnchor, Uptime, millis};
use crate::lifecycle::{LifecycleClassifier, LifecycleSource, UpgradeSource};
use crate::process::ProcessInfoProvider;
use crate::record::{AppStartData, StartupRecord};
use crate::reporter::{StartupReporter, StoreOperation};
use crate::scheduler::Scheduler;
use crate::session::PriorSession;
use crate::slot::RecordSlot;
use crate::store::KeyValueStore;

pub use checkpoints::Checkpoint;
pub use errors::{InitError, InitSkip};
pub use visibility::WarmStartListener;

/// The kind of host context `init` is called with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostContext {
    /// The application itself; the only context that owns the process.
    Application {
        /// Application name, used when the process name is unavailable.
        name: String,
    },
    /// A narrower component context, such as a plugin or service.
    Component {
        /// Description of the component kind.
        kind: String,
    },
}

impl HostContext {
    /// Application context called `name`.
    #[must_use]
    pub fn application(name: impl Into<String>) -> Self {
        Self::Application { name: name.into() }
    }

    /// Component context of the given kind.
    #[must_use]
    pub fn component(kind: impl Into<String>) -> Self {
        Self::Component { kind: kind.into() }
    }
}

/// Everything the engine consumes from its host.
#[derive(Clone)]
pub struct Collaborators {
    /// Resolves process identity and age.
    pub process: Arc<dyn ProcessInfoProvider>,
    /// Delivers visibility changes.
    pub lifecycle: Arc<dyn LifecycleSource>,
    /// Delivers install and upgrade detection.
    pub upgrades: Arc<dyn UpgradeSource>,
    /// Coordination thread scheduler.
    pub scheduler: Arc<dyn Scheduler>,
    /// Durable prior-session store.
    pub store: Arc<dyn KeyValueStore>,
    /// Monotonic and wall-clock time.
    pub clock: Arc<dyn Clock>,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn StartupReporter>,
    /// When the instrumentation code was loaded.
    pub anchor: ClockAnchor,
}

/// Engine tunables resolved from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Period between heartbeats.
    pub heartbeat_interval: Duration,
    /// Behaviour for checkpoints called off the coordination thread.
    pub off_thread_policy: OffThreadPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            off_thread_policy: OffThreadPolicy::for_build(),
        }
    }
}

impl Settings {
    /// Settings resolved from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            off_thread_policy: config.off_thread_policy(),
        }
    }
}

struct Engine {
    collaborators: Collaborators,
    settings: Settings,
    slot: RecordSlot,
    init_called: AtomicBool,
    process_start: OnceCell<Uptime>,
    classifier: Mutex<LifecycleClassifier>,
    ready_reported: AtomicBool,
    warm_start_listener: Mutex<Option<WarmStartListener>>,
}

impl Engine {
    /// Milliseconds since process start, once initialized.
    fn elapsed_ms(&self) -> Option<u64> {
        let start = self.process_start.get()?;
        Some(millis(clock::elapsed_since(
            self.collaborators.clock.as_ref(),
            *start,
        )))
    }

    /// Applies `change` and reports `checkpoint` if the record changed.
    fn record<F>(&self, checkpoint: &Checkpoint, elapsed_ms: u64, change: F)
    where
        F: FnMut(&AppStartData) -> Option<AppStartData>,
    {
        if self.slot.update(change).is_some() {
            self.collaborators
                .reporter
                .checkpoint_recorded(checkpoint, elapsed_ms);
        }
    }

    /// Whether a public checkpoint may run on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics off the coordination thread under [`OffThreadPolicy::Panic`].
    fn permits(&self, checkpoint: &Checkpoint) -> bool {
        if self.collaborators.scheduler.is_coordination_thread() {
            return true;
        }
        self.collaborators.reporter.off_thread_call(checkpoint);
        match self.settings.off_thread_policy {
            OffThreadPolicy::Panic => {
                panic!("{checkpoint} must be recorded on the coordination thread")
            }
            OffThreadPolicy::Ignore => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs `run` if the engine is still alive.
fn with_engine(engine: &Weak<Engine>, run: impl FnOnce(&Arc<Engine>)) {
    if let Some(engine) = engine.upgrade() {
        run(&engine);
    }
}

/// Handle to the process-wide startup instrumentation.
#[derive(Clone)]
pub struct AppStart {
    engine: Arc<Engine>,
}

impl fmt::Debug for AppStart {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppStart")
            .field("settings", &self.engine.settings)
            .field("record", &self.current_record())
            .finish_non_exhaustive()
    }
}

impl AppStart {
    /// Builds an uninitialized engine.
    #[must_use]
    pub fn new(collaborators: Collaborators, settings: Settings) -> Self {
        Self {
            engine: Arc::new(Engine {
                collaborators,
                settings,
                slot: RecordSlot::new(),
                init_called: AtomicBool::new(false),
                process_start: OnceCell::new(),
                classifier: Mutex::new(LifecycleClassifier::new()),
                ready_reported: AtomicBool::new(false),
                warm_start_listener: Mutex::new(None),
            }),
        }
    }

    /// Settings the engine runs with.
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.engine.settings
    }

    /// Initializes instrumentation for this process.
    ///
    /// Only the first call made on the coordination thread does anything.
    /// Failures leave the record uninitialized with the failure as its reason;
    /// the host carries on either way.
    pub fn init(&self, context: &HostContext) {
        let engine = &self.engine;
        let reporter = &engine.collaborators.reporter;
        if !engine.collaborators.scheduler.is_coordination_thread() {
            reporter.init_skipped(InitSkip::OffThread);
            return;
        }
        if engine.init_called.swap(true, Ordering::AcqRel) {
            reporter.init_skipped(InitSkip::AlreadyInitialized);
            return;
        }

        match initial_record(engine, context) {
            Ok((start, data)) => {
                engine.process_start.get_or_init(|| start);
                engine.slot.install(data.clone());
                reporter.initialized(&data);
                checkpoints::register(engine);
                visibility::register(engine);
                checkpoints::register_upgrades(engine);
                heartbeat::start(engine);
            }
            Err(error) => {
                engine.slot.fail(error.to_string());
                reporter.init_failed(&error);
            }
        }
    }

    /// Current snapshot of the record. Never blocks.
    #[must_use]
    pub fn current_record(&self) -> Arc<StartupRecord> {
        self.engine.slot.load()
    }

    /// Declares the host ready; the next rendered frame is recorded.
    ///
    /// # Panics
    ///
    /// Panics off the coordination thread under [`OffThreadPolicy::Panic`].
    pub fn report_ready(&self) {
        checkpoints::report_ready(&self.engine);
    }

    /// Records the first occurrence of `name`. Later calls with the same name
    /// keep the first elapsed time and payload.
    ///
    /// # Panics
    ///
    /// Panics off the coordination thread under [`OffThreadPolicy::Panic`].
    pub fn custom_first_event(&self, name: &str, payload: Option<serde_json::Value>) {
        checkpoints::custom_first_event(&self.engine, name, payload);
    }

    /// Records the first component instantiated after initialization.
    ///
    /// # Panics
    ///
    /// Panics off the coordination thread under [`OffThreadPolicy::Panic`].
    pub fn first_component_instantiated(&self, name: &str) {
        checkpoints::first_component_instantiated(&self.engine, name);
    }

    /// Replaces the warm start listener. `None` removes it.
    pub fn set_warm_start_listener(&self, listener: Option<WarmStartListener>) {
        *lock(&self.engine.warm_start_listener) = listener;
    }
}

fn initial_record(
    engine: &Engine,
    context: &HostContext,
) -> Result<(Uptime, AppStartData), InitError> {
    let app_name = match context {
        HostContext::Application { name } => name,
        HostContext::Component { kind } => {
            return Err(InitError::WrongContext { kind: kind.clone() });
        }
    };
    let collaborators = &engine.collaborators;
    let info = collaborators
        .process
        .resolve()
        .map_err(|source| InitError::ProcessInfo { source })?;

    // The host reports process age in its own clock domain; anchor it on ours.
    // Whole milliseconds keep start plus any recorded elapsed equal to the
    // uptime the checkpoint saw.
    let now = collaborators.clock.uptime();
    let wall_now = collaborators.clock.wall_clock_millis();
    let start = Uptime::from_millis(
        now.checked_sub(info.elapsed_since_start)
            .unwrap_or_default()
            .as_millis(),
    );
    let age_ms = millis(now.saturating_elapsed_since(start));

    let prior = PriorSession::read(collaborators.store.as_ref(), wall_now).unwrap_or_else(|error| {
        collaborators
            .reporter
            .store_failed(StoreOperation::ReadPriorSession, &error);
        PriorSession::default()
    });

    let importance = info
        .importance
        .or_else(|| collaborators.process.importance());
    let process_name = if info.name.is_empty() {
        app_name.clone()
    } else {
        info.name
    };

    let data = AppStartData {
        pid: info.pid,
        process_name,
        process_start_uptime_ms: start.as_millis(),
        process_start_wall_clock_ms: wall_now
            .saturating_sub(i64::try_from(age_ms).unwrap_or(i64::MAX)),
        first_app_code_loaded_elapsed_ms: millis(collaborators.anchor.elapsed_since(start)),
        engine_init_called_elapsed_ms: age_ms,
        first_work_item_drained_elapsed_ms: None,
        first_idle_elapsed_ms: None,
        first_priority_work_item_elapsed_ms: None,
        process_importance: importance.as_ref().map(|snapshot| snapshot.importance),
        process_importance_after_first_work_item: None,
        importance_reason_code: importance.as_ref().map(|snapshot| snapshot.reason_code),
        importance_reason_component: importance.and_then(|snapshot| snapshot.reason_component),
        app_tasks: info.tasks,
        last_visible_state: prior.last_visible_state,
        last_visible_state_changed_elapsed_wall_clock_ms: prior
            .last_visible_state_changed_elapsed_ms,
        last_alive_elapsed_wall_clock_ms: prior.last_alive_elapsed_ms,
        first_component_instantiated: None,
        first_frame_after_ready_elapsed_ms: None,
        custom_first_events: BTreeMap::new(),
        upgrade: None,
    };
    Ok((start, data))
}
