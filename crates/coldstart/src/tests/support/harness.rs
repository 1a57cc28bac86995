//! An engine wired entirely to deterministic doubles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use coldstart_config::OffThreadPolicy;

use crate::test_support::{
    ManualClock, ManualLifecycle, ManualScheduler, ManualUpgrades, RecordingReporter,
    StaticProcessInfo,
};
use crate::{
    AppStart, AppStartData, ClockAnchor, Collaborators, HostContext, ImportanceSnapshot,
    KeyValueStore, MemoryStore, ProcessImportance, ProcessInfo, Settings, Uptime, WarmStartEvent,
};

/// Monotonic reading when the harness is built.
pub const START_UPTIME_MS: u64 = 10_000;
/// Wall-clock reading when the harness is built.
pub const WALL_START_MS: i64 = 1_700_000_000_000;
/// Process age reported by the process double.
pub const PROCESS_AGE_MS: u64 = 400;
/// Process start on the monotonic clock.
pub const PROCESS_START_MS: u64 = START_UPTIME_MS - PROCESS_AGE_MS;
/// Code load instant, 50 ms after process start.
const ANCHOR_MS: u64 = PROCESS_START_MS + 50;

pub fn sample_process() -> ProcessInfo {
    ProcessInfo {
        pid: 4_242,
        name: "sample-app".to_owned(),
        elapsed_since_start: Duration::from_millis(PROCESS_AGE_MS),
        importance: Some(ImportanceSnapshot::new(ProcessImportance::Foreground)),
        tasks: Vec::new(),
    }
}

pub struct Harness {
    pub clock: ManualClock,
    pub scheduler: ManualScheduler,
    pub store: Arc<dyn KeyValueStore>,
    pub process: StaticProcessInfo,
    pub lifecycle: ManualLifecycle,
    pub upgrades: ManualUpgrades,
    pub reporter: RecordingReporter,
    pub app_start: AppStart,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(MemoryStore::new()),
            StaticProcessInfo::new(sample_process()),
            OffThreadPolicy::Ignore,
        )
    }

    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_parts(
            store,
            StaticProcessInfo::new(sample_process()),
            OffThreadPolicy::Ignore,
        )
    }

    pub fn with_process(process: StaticProcessInfo) -> Self {
        Self::with_parts(Arc::new(MemoryStore::new()), process, OffThreadPolicy::Ignore)
    }

    pub fn with_policy(policy: OffThreadPolicy) -> Self {
        Self::with_parts(
            Arc::new(MemoryStore::new()),
            StaticProcessInfo::new(sample_process()),
            policy,
        )
    }

    pub fn with_parts(
        store: Arc<dyn KeyValueStore>,
        process: StaticProcessInfo,
        off_thread_policy: OffThreadPolicy,
    ) -> Self {
        let clock = ManualClock::new(Uptime::from_millis(START_UPTIME_MS), WALL_START_MS);
        let scheduler = ManualScheduler::new(clock.clone());
        let lifecycle = ManualLifecycle::new();
        let upgrades = ManualUpgrades::new();
        let reporter = RecordingReporter::new();
        let collaborators = Collaborators {
            process: Arc::new(process.clone()),
            lifecycle: Arc::new(lifecycle.clone()),
            upgrades: Arc::new(upgrades.clone()),
            scheduler: Arc::new(scheduler.clone()),
            store: Arc::clone(&store),
            clock: Arc::new(clock.clone()),
            reporter: Arc::new(reporter.clone()),
            anchor: ClockAnchor::at(Uptime::from_millis(ANCHOR_MS)),
        };
        let settings = Settings {
            heartbeat_interval: Duration::from_millis(1_000),
            off_thread_policy,
        };
        Self {
            clock,
            scheduler,
            store,
            process,
            lifecycle,
            upgrades,
            reporter,
            app_start: AppStart::new(collaborators, settings),
        }
    }

    pub fn init(&self) {
        self.app_start.init(&HostContext::application("sample"));
    }

    pub fn data(&self) -> AppStartData {
        self.app_start
            .current_record()
            .data()
            .cloned()
            .expect("record should be initialized")
    }

    pub fn reason(&self) -> Option<String> {
        self.app_start
            .current_record()
            .reason()
            .map(str::to_owned)
    }

    /// Milliseconds since process start on the manual clock.
    pub fn elapsed_now(&self) -> u64 {
        use crate::Clock;
        self.clock.uptime().as_millis() - PROCESS_START_MS
    }

    /// Installs a listener collecting warm start events.
    pub fn collect_warm_starts(&self) -> Arc<Mutex<Vec<WarmStartEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        self.app_start
            .set_warm_start_listener(Some(Arc::new(move |event: &WarmStartEvent| {
                sink.lock().expect("listener mutex poisoned").push(*event);
            })));
        events
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
