//! Visibility changes: persistence and warm start classification.

use std::sync::Arc;

use crate::clock::Uptime;
use crate::lifecycle::{Temperature, Transition, Visibility, WarmStartEvent};
use crate::reporter::StoreOperation;
use crate::session;

use super::{Engine, lock, with_engine};

const VISIBILITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::visibility");

/// Listener notified once per classified resume.
pub type WarmStartListener = Arc<dyn Fn(&WarmStartEvent) + Send + Sync>;

pub(super) fn register(engine: &Arc<Engine>) {
    let weak = Arc::downgrade(engine);
    engine
        .collaborators
        .lifecycle
        .register_visibility_callback(Box::new(move |visibility, temperature| {
            with_engine(&weak, |engine| {
                visibility_changed(engine, visibility, temperature);
            });
        }));
}

fn visibility_changed(engine: &Arc<Engine>, visibility: Visibility, temperature: Temperature) {
    let collaborators = &engine.collaborators;
    let now = collaborators.clock.uptime();
    let transition = lock(&engine.classifier).on_change(visibility, now);
    if transition == Transition::Unchanged {
        return;
    }

    let wall_now = collaborators.clock.wall_clock_millis();
    if let Err(error) = session::record_visibility(collaborators.store.as_ref(), visibility, wall_now)
    {
        collaborators
            .reporter
            .store_failed(StoreOperation::RecordVisibility, &error);
    }

    match transition {
        Transition::Resumed { background_elapsed } => {
            let weak = Arc::downgrade(engine);
            collaborators
                .scheduler
                .post_after_next_frame(Box::new(move || {
                    with_engine(&weak, |engine| {
                        resumed_frame_rendered(engine, temperature, background_elapsed, now);
                    });
                }));
        }
        Transition::VisibleWithoutBackground => {
            tracing::debug!(
                target: VISIBILITY_TARGET,
                event = "resume_unmeasured",
                temperature = %temperature,
                "visible again without a recorded background entry"
            );
        }
        Transition::Unchanged | Transition::ColdStartPart | Transition::Backgrounded => {}
    }
}

fn resumed_frame_rendered(
    engine: &Arc<Engine>,
    temperature: Temperature,
    background_elapsed: std::time::Duration,
    resumed_at: Uptime,
) {
    let event = WarmStartEvent {
        temperature,
        background_elapsed,
        resume_to_next_frame: engine
            .collaborators
            .clock
            .uptime()
            .saturating_elapsed_since(resumed_at),
    };
    engine.collaborators.reporter.warm_start(&event);
    let listener = lock(&engine.warm_start_listener).clone();
    if let Some(listener) = listener {
        listener(&event);
    }
}
