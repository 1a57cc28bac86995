//! Periodic "still alive" marker for the next session.

use std::sync::Arc;

use crate::reporter::StoreOperation;
use crate::session;

use super::{Engine, with_engine};

pub(super) fn start(engine: &Arc<Engine>) {
    schedule_next(engine);
}

fn schedule_next(engine: &Arc<Engine>) {
    let weak = Arc::downgrade(engine);
    engine.collaborators.scheduler.post_delayed(
        engine.settings.heartbeat_interval,
        Box::new(move || with_engine(&weak, tick)),
    );
}

fn tick(engine: &Arc<Engine>) {
    let wall_now = engine.collaborators.clock.wall_clock_millis();
    if let Err(error) = session::record_alive(engine.collaborators.store.as_ref(), wall_now) {
        engine
            .collaborators
            .reporter
            .store_failed(StoreOperation::RecordAlive, &error);
    }
    schedule_next(engine);
}
