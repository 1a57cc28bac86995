//! Deterministic collaborator doubles for hosts and tests.
//!
//! Every double is a cheap clonable handle; clones share state, so a test can
//! keep one handle while the engine owns another.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::clock::{Clock, Uptime, millis};
use crate::lifecycle::{
    LifecycleSource, Temperature, UpgradeCallback, UpgradeSource, Visibility, VisibilityCallback,
    WarmStartEvent,
};
use crate::process::{ImportanceSnapshot, ProcessInfo, ProcessInfoError, ProcessInfoProvider};
use crate::record::{AppStartData, RecordMutator};
use crate::reporter::{StartupReporter, StoreOperation};
use crate::scheduler::{IdleHandler, Scheduler, Task};
use crate::startup::{Checkpoint, InitError, InitSkip};
use crate::store::StoreError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock that only moves when told to. Both domains advance together.
#[derive(Debug, Clone)]
pub struct ManualClock {
    uptime_ms: Arc<AtomicU64>,
    wall_ms: Arc<AtomicI64>,
}

impl ManualClock {
    /// Clock reading `uptime` on the monotonic clock and `wall_ms` on the
    /// wall clock.
    #[must_use]
    pub fn new(uptime: Uptime, wall_ms: i64) -> Self {
        Self {
            uptime_ms: Arc::new(AtomicU64::new(uptime.as_millis())),
            wall_ms: Arc::new(AtomicI64::new(wall_ms)),
        }
    }

    /// Moves both clocks forward by `amount`.
    pub fn advance(&self, amount: Duration) {
        let step = millis(amount);
        self.uptime_ms.fetch_add(step, Ordering::SeqCst);
        self.wall_ms
            .fetch_add(i64::try_from(step).unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    /// Sets the wall clock without touching the monotonic clock.
    pub fn set_wall_clock(&self, wall_ms: i64) {
        self.wall_ms.store(wall_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn uptime(&self) -> Uptime {
        Uptime::from_millis(self.uptime_ms.load(Ordering::SeqCst))
    }

    fn wall_clock_millis(&self) -> i64 {
        self.wall_ms.load(Ordering::SeqCst)
    }
}

struct DelayedTask {
    due: Uptime,
    task: Task,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Task>,
    delayed: Vec<DelayedTask>,
    idle: Vec<IdleHandler>,
    frame_callbacks: Vec<Task>,
}

/// Scheduler driven step by step by the test.
///
/// The thread that builds it is the coordination thread. Delayed tasks fall
/// due against the shared [`ManualClock`].
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    owner: ThreadId,
    state: Arc<Mutex<SchedulerState>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ManualScheduler")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl ManualScheduler {
    /// Scheduler owned by the calling thread.
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            owner: thread::current().id(),
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Runs queued tasks, including delayed tasks that are due, until the
    /// queue is empty. Returns how many ran.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut state = lock(&self.state);
                let now = self.clock.uptime();
                let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
                    .into_iter()
                    .partition(|delayed| delayed.due <= now);
                state.delayed = pending;
                state
                    .queue
                    .extend(due.into_iter().map(|delayed| delayed.task));
                state.queue.pop_front()
            };
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Runs every idle handler once. Returns how many ran.
    pub fn run_idle(&self) -> usize {
        let handlers = std::mem::take(&mut lock(&self.state).idle);
        let count = handlers.len();
        let mut kept = Vec::new();
        for mut handler in handlers {
            if handler() {
                kept.push(handler);
            }
        }
        let mut state = lock(&self.state);
        kept.append(&mut state.idle);
        state.idle = kept;
        count
    }

    /// Runs the callbacks waiting for a frame. Returns how many ran.
    pub fn render_frame(&self) -> usize {
        let callbacks = std::mem::take(&mut lock(&self.state).frame_callbacks);
        let count = callbacks.len();
        callbacks.into_iter().for_each(|callback| callback());
        count
    }

    /// Advances the clock by `amount` and drains the queue.
    pub fn advance(&self, amount: Duration) -> usize {
        self.clock.advance(amount);
        self.drain()
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Delayed tasks not yet due.
    #[must_use]
    pub fn delayed(&self) -> usize {
        lock(&self.state).delayed.len()
    }

    /// Registered idle handlers.
    #[must_use]
    pub fn idle_handlers(&self) -> usize {
        lock(&self.state).idle.len()
    }

    /// Callbacks waiting for a frame.
    #[must_use]
    pub fn frame_callbacks(&self) -> usize {
        lock(&self.state).frame_callbacks.len()
    }
}

impl Scheduler for ManualScheduler {
    fn post(&self, task: Task) {
        lock(&self.state).queue.push_back(task);
    }

    fn post_at_front(&self, task: Task) {
        lock(&self.state).queue.push_front(task);
    }

    fn post_delayed(&self, delay: Duration, task: Task) {
        let now = self.clock.uptime();
        let due = now.checked_add(delay).unwrap_or(now);
        lock(&self.state).delayed.push(DelayedTask { due, task });
    }

    fn on_idle(&self, handler: IdleHandler) {
        lock(&self.state).idle.push(handler);
    }

    fn post_after_next_frame(&self, task: Task) {
        lock(&self.state).frame_callbacks.push(task);
    }

    fn is_coordination_thread(&self) -> bool {
        thread::current().id() == self.owner
    }
}

/// Process information provider returning a scripted answer.
#[derive(Debug, Clone)]
pub struct StaticProcessInfo {
    resolved: Arc<Mutex<Result<ProcessInfo, String>>>,
    importance: Arc<Mutex<Option<ImportanceSnapshot>>>,
}

impl StaticProcessInfo {
    /// Provider resolving to `info`.
    #[must_use]
    pub fn new(info: ProcessInfo) -> Self {
        let importance = info.importance.clone();
        Self {
            resolved: Arc::new(Mutex::new(Ok(info))),
            importance: Arc::new(Mutex::new(importance)),
        }
    }

    /// Provider whose resolution fails with `reason`.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            resolved: Arc::new(Mutex::new(Err(reason.into()))),
            importance: Arc::new(Mutex::new(None)),
        }
    }

    /// Changes the importance reported by later snapshots.
    pub fn set_importance(&self, importance: Option<ImportanceSnapshot>) {
        *lock(&self.importance) = importance;
    }
}

impl ProcessInfoProvider for StaticProcessInfo {
    fn resolve(&self) -> Result<ProcessInfo, ProcessInfoError> {
        lock(&self.resolved)
            .clone()
            .map_err(|reason| ProcessInfoError::Unavailable { reason })
    }

    fn importance(&self) -> Option<ImportanceSnapshot> {
        lock(&self.importance).clone()
    }
}

/// Lifecycle source the test drives by hand.
#[derive(Clone, Default)]
pub struct ManualLifecycle {
    callbacks: Arc<Mutex<Vec<Arc<VisibilityCallback>>>>,
}

impl std::fmt::Debug for ManualLifecycle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ManualLifecycle")
            .field("callbacks", &self.registered())
            .finish()
    }
}

impl ManualLifecycle {
    /// Builds a source with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a visibility change to every callback.
    pub fn notify(&self, visibility: Visibility, temperature: Temperature) {
        let callbacks = lock(&self.callbacks).clone();
        for callback in callbacks {
            callback(visibility, temperature);
        }
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn registered(&self) -> usize {
        lock(&self.callbacks).len()
    }
}

impl LifecycleSource for ManualLifecycle {
    fn register_visibility_callback(&self, callback: VisibilityCallback) {
        lock(&self.callbacks).push(Arc::new(callback));
    }
}

/// Upgrade source the test drives by hand.
#[derive(Clone, Default)]
pub struct ManualUpgrades {
    callback: Arc<Mutex<Option<UpgradeCallback>>>,
}

impl std::fmt::Debug for ManualUpgrades {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ManualUpgrades")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl ManualUpgrades {
    /// Builds a source with no callback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands `mutator` to the registered callback. Returns `false` when no
    /// callback is waiting.
    pub fn deliver(&self, mutator: RecordMutator) -> bool {
        let callback = lock(&self.callback).take();
        match callback {
            Some(callback) => {
                callback(mutator);
                true
            }
            None => false,
        }
    }

    /// Whether a callback is registered and not yet used.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        lock(&self.callback).is_some()
    }
}

impl UpgradeSource for ManualUpgrades {
    fn register_upgrade_callback(&self, callback: UpgradeCallback) {
        *lock(&self.callback) = Some(callback);
    }
}

/// Events captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReportedEvent {
    /// `init` was ignored.
    InitSkipped(InitSkip),
    /// `init` failed with this message.
    InitFailed(String),
    /// The record for this process id was installed.
    Initialized(u32),
    /// A checkpoint was recorded.
    CheckpointRecorded(Checkpoint, u64),
    /// A checkpoint was attempted off the coordination thread.
    OffThreadCall(Checkpoint),
    /// A resume was classified.
    WarmStart(WarmStartEvent),
    /// Upgrade details were merged.
    UpgradeMerged,
    /// A store access failed.
    StoreFailed(StoreOperation),
}

/// Reporter that keeps every event for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<ReportedEvent>>>,
}

impl RecordingReporter {
    /// Builds an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ReportedEvent> {
        lock(&self.events).clone()
    }

    fn push(&self, event: ReportedEvent) {
        lock(&self.events).push(event);
    }
}

impl StartupReporter for RecordingReporter {
    fn init_skipped(&self, skip: InitSkip) {
        self.push(ReportedEvent::InitSkipped(skip));
    }

    fn init_failed(&self, error: &InitError) {
        self.push(ReportedEvent::InitFailed(error.to_string()));
    }

    fn initialized(&self, data: &AppStartData) {
        self.push(ReportedEvent::Initialized(data.pid));
    }

    fn checkpoint_recorded(&self, checkpoint: &Checkpoint, elapsed_ms: u64) {
        self.push(ReportedEvent::CheckpointRecorded(
            checkpoint.clone(),
            elapsed_ms,
        ));
    }

    fn off_thread_call(&self, checkpoint: &Checkpoint) {
        self.push(ReportedEvent::OffThreadCall(checkpoint.clone()));
    }

    fn warm_start(&self, event: &WarmStartEvent) {
        self.push(ReportedEvent::WarmStart(*event));
    }

    fn upgrade_merged(&self) {
        self.push(ReportedEvent::UpgradeMerged);
    }

    fn store_failed(&self, operation: StoreOperation, _error: &StoreError) {
        self.push(ReportedEvent::StoreFailed(operation));
    }
}
