//! A cooperative coordination loop implementing [`Scheduler`].
//!
//! Hosts without their own main-thread looper run an [`EventLoop`] on a
//! dedicated thread and report rendered frames through
//! [`LoopHandle::frame_rendered`].

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::scheduler::{IdleHandler, Scheduler, Task};

const LOOP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::event_loop");

/// Errors raised when running the loop on its own thread.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The loop thread could not be started.
    #[error("failed to spawn event loop thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A task panicked and took the loop thread down.
    #[error("event loop thread panicked")]
    ThreadPanic,
}

struct Delayed {
    due: Instant,
    sequence: u64,
    task: Task,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.sequence).cmp(&(other.due, other.sequence))
    }
}

#[derive(Default)]
struct LoopState {
    queue: VecDeque<Task>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    idle: Vec<IdleHandler>,
    idle_pending: bool,
    frame_callbacks: Vec<Task>,
    rendered: Vec<Task>,
    next_sequence: u64,
    owner: Option<ThreadId>,
    shutdown: bool,
}

impl LoopState {
    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|Reverse(delayed)| delayed.due <= now)
        {
            if let Some(Reverse(delayed)) = self.delayed.pop() {
                self.queue.push_back(delayed.task);
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse(delayed)| delayed.due)
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state(&self, change: impl FnOnce(&mut LoopState)) {
        change(&mut self.lock());
        self.wake.notify_all();
    }
}

/// Work selected by one turn of the loop.
enum Turn {
    Frame(Vec<Task>),
    Task(Task),
    Idle(Vec<IdleHandler>),
    Stop,
}

/// Cloneable handle used to post work to an [`EventLoop`].
#[derive(Clone, Default)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("LoopHandle").finish_non_exhaustive()
    }
}

impl LoopHandle {
    /// Signals that a frame has been rendered. Callbacks registered before
    /// this call run on the next turn; later ones wait for another frame.
    pub fn frame_rendered(&self) {
        self.shared.with_state(|state| {
            let callbacks = std::mem::take(&mut state.frame_callbacks);
            state.rendered.extend(callbacks);
        });
    }

    /// Stops the loop after the task currently running. Queued work is
    /// dropped.
    pub fn shutdown(&self) {
        self.shared.with_state(|state| state.shutdown = true);
    }
}

impl Scheduler for LoopHandle {
    fn post(&self, task: Task) {
        self.shared.with_state(|state| state.queue.push_back(task));
    }

    fn post_at_front(&self, task: Task) {
        self.shared.with_state(|state| state.queue.push_front(task));
    }

    fn post_delayed(&self, delay: Duration, task: Task) {
        let due = Instant::now() + delay;
        self.shared.with_state(|state| {
            let sequence = state.next_sequence;
            state.next_sequence = state.next_sequence.wrapping_add(1);
            state.delayed.push(Reverse(Delayed {
                due,
                sequence,
                task,
            }));
        });
    }

    fn on_idle(&self, handler: IdleHandler) {
        self.shared.with_state(|state| {
            state.idle.push(handler);
            state.idle_pending = true;
        });
    }

    fn post_after_next_frame(&self, task: Task) {
        self.shared
            .with_state(|state| state.frame_callbacks.push(task));
    }

    fn is_coordination_thread(&self) -> bool {
        self.shared.lock().owner == Some(thread::current().id())
    }
}

/// Single-threaded cooperative loop.
///
/// Each turn runs, in priority order: frame callbacks after a rendered frame,
/// the next queued task (due delayed tasks are queued first), then idle
/// handlers once the queue has drained after doing work.
#[derive(Debug, Default)]
pub struct EventLoop {
    handle: LoopHandle,
}

impl EventLoop {
    /// Builds an idle loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for posting work and signalling frames.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Runs the loop on the calling thread until [`LoopHandle::shutdown`].
    pub fn run(self) {
        let shared = Arc::clone(&self.handle.shared);
        shared.lock().owner = Some(thread::current().id());
        debug!(target: LOOP_TARGET, event = "loop_started", "coordination loop running");
        loop {
            match next_turn(&shared) {
                Turn::Frame(callbacks) => callbacks.into_iter().for_each(|callback| callback()),
                Turn::Task(task) => task(),
                Turn::Idle(handlers) => run_idle(&shared, handlers),
                Turn::Stop => break,
            }
        }
        shared.lock().owner = None;
        debug!(target: LOOP_TARGET, event = "loop_stopped", "coordination loop stopped");
    }

    /// Runs the loop on a new thread called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Spawn`] if the thread could not be started.
    pub fn spawn(self, name: &str) -> Result<LoopThread, LoopError> {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || self.run())
            .map_err(|source| LoopError::Spawn { source })?;
        Ok(LoopThread {
            handle,
            join: Some(join),
        })
    }
}

fn next_turn(shared: &Shared) -> Turn {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return Turn::Stop;
        }
        let now = Instant::now();
        state.promote_due(now);
        if !state.rendered.is_empty() {
            return Turn::Frame(std::mem::take(&mut state.rendered));
        }
        if let Some(task) = state.queue.pop_front() {
            state.idle_pending = true;
            return Turn::Task(task);
        }
        if state.idle_pending && !state.idle.is_empty() {
            state.idle_pending = false;
            return Turn::Idle(std::mem::take(&mut state.idle));
        }
        state = match state.next_due() {
            Some(due) => {
                let timeout = due.saturating_duration_since(now);
                shared
                    .wake
                    .wait_timeout(state, timeout)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0)
            }
            None => shared
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
}

fn run_idle(shared: &Shared, handlers: Vec<IdleHandler>) {
    let mut kept = Vec::with_capacity(handlers.len());
    for mut handler in handlers {
        if handler() {
            kept.push(handler);
        }
    }
    let mut state = shared.lock();
    // Handlers registered while these ran keep their place after the survivors.
    kept.append(&mut state.idle);
    state.idle = kept;
}

/// Join handle for a loop running on its own thread. Dropping it stops the
/// loop without waiting.
#[derive(Debug)]
pub struct LoopThread {
    handle: LoopHandle,
    join: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Handle for posting work to the loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stops the loop and waits for its thread to finish.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::ThreadPanic`] if a task panicked.
    pub fn shutdown_and_join(mut self) -> Result<(), LoopError> {
        self.handle.shutdown();
        match self.join.take() {
            Some(join) => join.join().map_err(|_| LoopError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}
