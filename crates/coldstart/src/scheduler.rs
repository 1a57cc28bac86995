//! Scheduling facade over the host's coordination thread.

use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Unit of work run on the coordination thread.
pub type Task = Box<dyn FnOnce() + Send>;

/// Callback run when the coordination thread goes idle. Returning `true`
/// keeps it registered for the next idle period.
pub type IdleHandler = Box<dyn FnMut() -> bool + Send>;

/// Capabilities the engine needs from the host scheduler.
///
/// Every callback runs on the coordination thread, in the order the host
/// delivers it.
#[cfg_attr(test, automock)]
pub trait Scheduler: Send + Sync {
    /// Appends `task` to the work queue.
    fn post(&self, task: Task);

    /// Inserts `task` ahead of everything already queued.
    fn post_at_front(&self, task: Task);

    /// Queues `task` once `delay` has passed.
    fn post_delayed(&self, delay: Duration, task: Task);

    /// Registers an idle handler.
    fn on_idle(&self, handler: IdleHandler);

    /// Runs `task` once the next frame has been rendered.
    fn post_after_next_frame(&self, task: Task);

    /// Whether the caller is running on the coordination thread.
    fn is_coordination_thread(&self) -> bool;
}

impl<T> Scheduler for Arc<T>
where
    T: Scheduler + ?Sized,
{
    fn post(&self, task: Task) {
        (**self).post(task);
    }

    fn post_at_front(&self, task: Task) {
        (**self).post_at_front(task);
    }

    fn post_delayed(&self, delay: Duration, task: Task) {
        (**self).post_delayed(delay, task);
    }

    fn on_idle(&self, handler: IdleHandler) {
        (**self).on_idle(handler);
    }

    fn post_after_next_frame(&self, task: Task) {
        (**self).post_after_next_frame(task);
    }

    fn is_coordination_thread(&self) -> bool {
        (**self).is_coordination_thread()
    }
}
