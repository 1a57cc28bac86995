//! One-shot checkpoint recording.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{Engine, lock, with_engine};

/// Named checkpoints in the startup timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// The first work item posted at init ran.
    FirstWorkItemDrained,
    /// The coordination thread went idle for the first time.
    FirstIdle,
    /// The first work item posted at the front of the queue ran.
    FirstPriorityWorkItem,
    /// A component was instantiated.
    FirstComponentInstantiated {
        /// Component name.
        name: String,
    },
    /// A frame was rendered after the host reported ready.
    FirstFrameAfterReady,
    /// A host-named event occurred.
    CustomFirstEvent {
        /// Event name.
        name: String,
    },
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstWorkItemDrained => formatter.write_str("first_work_item_drained"),
            Self::FirstIdle => formatter.write_str("first_idle"),
            Self::FirstPriorityWorkItem => formatter.write_str("first_priority_work_item"),
            Self::FirstComponentInstantiated { name } => {
                write!(formatter, "first_component_instantiated({name})")
            }
            Self::FirstFrameAfterReady => formatter.write_str("first_frame_after_ready"),
            Self::CustomFirstEvent { name } => write!(formatter, "custom_first_event({name})"),
        }
    }
}

/// Registers the scheduler-driven checkpoints.
pub(super) fn register(engine: &Arc<Engine>) {
    let scheduler = &engine.collaborators.scheduler;

    let weak = Arc::downgrade(engine);
    scheduler.post(Box::new(move || with_engine(&weak, first_work_item_drained)));

    let weak = Arc::downgrade(engine);
    scheduler.on_idle(Box::new(move || {
        with_engine(&weak, first_idle);
        false
    }));

    let weak = Arc::downgrade(engine);
    scheduler.post_at_front(Box::new(move || {
        with_engine(&weak, first_priority_work_item);
    }));
}

/// Registers for upgrade detection. Mutators are applied on the coordination
/// thread like any other write.
pub(super) fn register_upgrades(engine: &Arc<Engine>) {
    let weak = Arc::downgrade(engine);
    engine
        .collaborators
        .upgrades
        .register_upgrade_callback(Box::new(move |mutator| {
            let target = weak.clone();
            with_engine(&weak, move |engine| {
                engine.collaborators.scheduler.post(Box::new(move || {
                    with_engine(&target, |engine| merge_upgrade(engine, mutator));
                }));
            });
        }));
}

fn first_work_item_drained(engine: &Arc<Engine>) {
    let Some(elapsed) = engine.elapsed_ms() else {
        return;
    };
    let importance = engine
        .collaborators
        .process
        .importance()
        .map(|snapshot| snapshot.importance);
    lock(&engine.classifier).first_work_item_drained();
    engine.record(&Checkpoint::FirstWorkItemDrained, elapsed, |data| {
        data.with_first_work_item_drained(elapsed, importance)
    });
}

fn first_idle(engine: &Arc<Engine>) {
    let Some(elapsed) = engine.elapsed_ms() else {
        return;
    };
    engine.record(&Checkpoint::FirstIdle, elapsed, |data| {
        data.with_first_idle(elapsed)
    });
}

fn first_priority_work_item(engine: &Arc<Engine>) {
    let Some(elapsed) = engine.elapsed_ms() else {
        return;
    };
    engine.record(&Checkpoint::FirstPriorityWorkItem, elapsed, |data| {
        data.with_first_priority_work_item(elapsed)
    });
}

fn first_frame_after_ready(engine: &Arc<Engine>) {
    let Some(elapsed) = engine.elapsed_ms() else {
        return;
    };
    engine.record(&Checkpoint::FirstFrameAfterReady, elapsed, |data| {
        data.with_first_frame_after_ready(elapsed)
    });
}

fn merge_upgrade(engine: &Arc<Engine>, mutator: crate::record::RecordMutator) {
    let mut pending = Some(mutator);
    // Writers share the coordination thread, so the swap never retries.
    let merged = engine
        .slot
        .update(|data| pending.take().map(|apply| apply(data.clone())));
    if merged.is_some() {
        engine.collaborators.reporter.upgrade_merged();
    }
}

pub(super) fn report_ready(engine: &Arc<Engine>) {
    if !engine.permits(&Checkpoint::FirstFrameAfterReady) {
        return;
    }
    if engine.process_start.get().is_none() || engine.ready_reported.swap(true, Ordering::AcqRel)
    {
        return;
    }
    let weak = Arc::downgrade(engine);
    engine
        .collaborators
        .scheduler
        .post_after_next_frame(Box::new(move || with_engine(&weak, first_frame_after_ready)));
}

pub(super) fn custom_first_event(
    engine: &Arc<Engine>,
    name: &str,
    payload: Option<serde_json::Value>,
) {
    let checkpoint = Checkpoint::CustomFirstEvent {
        name: name.to_owned(),
    };
    if !engine.permits(&checkpoint) {
        return;
    }
    let Some(elapsed) = engine.elapsed_ms() else {
        return;
    };
    engine.record(&checkpoint, elapsed, |data| {
        data.with_custom_first_event(name, elapsed, payload.clone())
    });
}

pub(super) fn first_component_instantiated(engine: &Arc<Engine>, name: &str) {
    let checkpoint = Checkpoint::FirstComponentInstantiated {
        name: name.to_owned(),
    };
    if !engine.permits(&checkpoint) {
        return;
    }
    let Some(elapsed) = engine.elapsed_ms() else {
        return;
    };
    engine.record(&checkpoint, elapsed, |data| {
        data.with_first_component(name, elapsed)
    });
}
