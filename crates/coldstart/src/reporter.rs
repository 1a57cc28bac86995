//! Structured reporting for instrumentation lifecycle events.

use std::sync::Arc;

use crate::lifecycle::WarmStartEvent;
use crate::record::AppStartData;
use crate::startup::{Checkpoint, InitError, InitSkip};
use crate::store::StoreError;

const REPORTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::startup");

/// Store access that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Reading the prior session at init.
    ReadPriorSession,
    /// Persisting a visibility change.
    RecordVisibility,
    /// Persisting a heartbeat.
    RecordAlive,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ReadPriorSession => "read_prior_session",
            Self::RecordVisibility => "record_visibility",
            Self::RecordAlive => "record_alive",
        };
        formatter.write_str(label)
    }
}

/// Observer trait used to surface instrumentation events to telemetry sinks.
pub trait StartupReporter: Send + Sync {
    /// Invoked when `init` was ignored.
    fn init_skipped(&self, skip: InitSkip);

    /// Invoked when `init` could not build a record.
    fn init_failed(&self, error: &InitError);

    /// Invoked once the initial record is installed.
    fn initialized(&self, data: &AppStartData);

    /// Invoked when a checkpoint field is set for the first time.
    fn checkpoint_recorded(&self, checkpoint: &Checkpoint, elapsed_ms: u64);

    /// Invoked when a checkpoint is attempted off the coordination thread.
    fn off_thread_call(&self, checkpoint: &Checkpoint);

    /// Invoked when a resume is classified as a warm or hot start.
    fn warm_start(&self, event: &WarmStartEvent);

    /// Invoked when upgrade details are merged into the record.
    fn upgrade_merged(&self);

    /// Invoked when the durable store could not be read or written.
    fn store_failed(&self, operation: StoreOperation, error: &StoreError);
}

impl<T> StartupReporter for Arc<T>
where
    T: StartupReporter + ?Sized,
{
    fn init_skipped(&self, skip: InitSkip) {
        (**self).init_skipped(skip);
    }

    fn init_failed(&self, error: &InitError) {
        (**self).init_failed(error);
    }

    fn initialized(&self, data: &AppStartData) {
        (**self).initialized(data);
    }

    fn checkpoint_recorded(&self, checkpoint: &Checkpoint, elapsed_ms: u64) {
        (**self).checkpoint_recorded(checkpoint, elapsed_ms);
    }

    fn off_thread_call(&self, checkpoint: &Checkpoint) {
        (**self).off_thread_call(checkpoint);
    }

    fn warm_start(&self, event: &WarmStartEvent) {
        (**self).warm_start(event);
    }

    fn upgrade_merged(&self) {
        (**self).upgrade_merged();
    }

    fn store_failed(&self, operation: StoreOperation, error: &StoreError) {
        (**self).store_failed(operation, error);
    }
}

/// Default reporter that records events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStartupReporter;

impl TracingStartupReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StartupReporter for TracingStartupReporter {
    fn init_skipped(&self, skip: InitSkip) {
        tracing::debug!(
            target: REPORTER_TARGET,
            event = "init_skipped",
            skip = %skip,
            "ignored startup instrumentation init"
        );
    }

    fn init_failed(&self, error: &InitError) {
        tracing::warn!(
            target: REPORTER_TARGET,
            event = "init_failed",
            error = %error,
            "startup instrumentation disabled"
        );
    }

    fn initialized(&self, data: &AppStartData) {
        tracing::info!(
            target: REPORTER_TARGET,
            event = "initialized",
            pid = data.pid,
            process = %data.process_name,
            first_app_code_loaded_ms = data.first_app_code_loaded_elapsed_ms,
            engine_init_called_ms = data.engine_init_called_elapsed_ms,
            last_visible_state = ?data.last_visible_state,
            "startup instrumentation initialized"
        );
    }

    fn checkpoint_recorded(&self, checkpoint: &Checkpoint, elapsed_ms: u64) {
        tracing::debug!(
            target: REPORTER_TARGET,
            event = "checkpoint_recorded",
            checkpoint = %checkpoint,
            elapsed_ms,
            "startup checkpoint recorded"
        );
    }

    fn off_thread_call(&self, checkpoint: &Checkpoint) {
        tracing::warn!(
            target: REPORTER_TARGET,
            event = "off_thread_call",
            checkpoint = %checkpoint,
            "checkpoint invoked off the coordination thread"
        );
    }

    fn warm_start(&self, event: &WarmStartEvent) {
        tracing::info!(
            target: REPORTER_TARGET,
            event = "warm_start",
            temperature = %event.temperature,
            background_ms = crate::clock::millis(event.background_elapsed),
            resume_to_next_frame_ms = crate::clock::millis(event.resume_to_next_frame),
            "resume classified"
        );
    }

    fn upgrade_merged(&self) {
        tracing::debug!(
            target: REPORTER_TARGET,
            event = "upgrade_merged",
            "upgrade details merged into startup record"
        );
    }

    fn store_failed(&self, operation: StoreOperation, error: &StoreError) {
        tracing::warn!(
            target: REPORTER_TARGET,
            event = "store_failed",
            operation = %operation,
            error = %error,
            "startup state store unavailable"
        );
    }
}
