//! Startup instrumentation for long-lived host processes.
//!
//! The crate builds one progressively filled [`StartupRecord`] describing when
//! each startup milestone happened relative to process creation. The process
//! start instant is inferred from operating system counters and reconciled
//! with the crate's monotonic clock; every elapsed value in the record is a
//! monotonic delta from that instant.
//!
//! Hosts construct an [`AppStart`] with their [`Collaborators`] (or let
//! [`bootstrap_with`] wire the defaults from [`coldstart_config::Config`]),
//! call [`AppStart::init`] once on the coordination thread, and then read the
//! record from anywhere with [`AppStart::current_record`]. Checkpoints fire
//! from the host [`Scheduler`]: the first drained work item, the first idle
//! period, the first priority work item, the first frame after
//! [`AppStart::report_ready`], and host-named custom events.
//!
//! Visibility changes feed a [`LifecycleClassifier`] that separates the cold
//! start from later warm and hot resumes, reported through the optional warm
//! start listener. A small durable [`KeyValueStore`] keeps the last visibility
//! change and a periodic heartbeat so the next process can tell how long ago
//! this one was last seen.
//!
//! Instrumentation never takes the host down: a failed `init` leaves the
//! record in its not-initialized state with a reason, and misuse is ignored.

mod bootstrap;
mod clock;
mod event_loop;
mod lifecycle;
mod process;
mod record;
mod reporter;
mod scheduler;
mod session;
mod slot;
mod startup;
mod store;
mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use bootstrap::{
    BootstrapError, ConfigLoader, HostBindings, Instrumentation, StaticConfigLoader,
    SystemConfigLoader, bootstrap, bootstrap_with,
};
pub use clock::{Clock, ClockAnchor, SystemClock, Uptime, elapsed_since};
pub use event_loop::{EventLoop, LoopError, LoopHandle, LoopThread};
pub use lifecycle::{
    LifecycleClassifier, LifecycleSource, Temperature, Transition, UpgradeCallback,
    UpgradeSource, Visibility, VisibilityCallback, VisibilityParseError, WarmStartEvent,
};
#[cfg(target_os = "linux")]
pub use process::ProcfsProcessInfo;
pub use process::{
    AppTask, ImportanceReason, ImportanceSnapshot, ProcessImportance, ProcessInfo,
    ProcessInfoError, ProcessInfoProvider,
};
pub use record::{
    AppStartData, CustomFirstEvent, FirstComponent, RecordMutator, StartupRecord, UpgradeInfo,
    UpgradeStatus,
};
pub use reporter::{StartupReporter, StoreOperation, TracingStartupReporter};
pub use scheduler::{IdleHandler, Scheduler, Task};
pub use session::{
    LAST_ALIVE_KEY, LAST_VISIBLE_STATE_CHANGED_KEY, LAST_VISIBLE_STATE_KEY, PriorSession,
    record_alive, record_visibility,
};
pub use slot::{NOT_YET_INITIALIZED, RecordSlot};
pub use startup::{
    AppStart, Checkpoint, Collaborators, HostContext, InitError, InitSkip, Settings,
    WarmStartListener,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, StoredValue};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

#[cfg(test)]
mod tests;
