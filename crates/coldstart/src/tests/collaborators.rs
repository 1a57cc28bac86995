//! Collaborator contracts checked with mocks.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use coldstart_config::OffThreadPolicy;
use mockall::mock;
use rstest::rstest;

use crate::scheduler::MockScheduler;
use crate::test_support::{
    ManualClock, ManualLifecycle, ManualUpgrades, RecordingReporter, ReportedEvent,
    StaticProcessInfo,
};
use crate::{
    AppStart, ClockAnchor, Collaborators, HostContext, KeyValueStore, LAST_ALIVE_KEY,
    StoreError, StoreOperation, StoredValue, Uptime,
};

use super::support::{Harness, START_UPTIME_MS, WALL_START_MS, sample_process};

mock! {
    Store {}
    impl KeyValueStore for Store {
        fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError>;
        fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError>;
    }
}

fn unplugged(path: &str) -> StoreError {
    StoreError::Read {
        path: PathBuf::from(path),
        source: io::Error::other("disk unplugged"),
    }
}

#[rstest]
fn unreadable_store_degrades_to_no_prior_session() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .once()
        .returning(|_| Err(unplugged("state.json")));
    let harness = Harness::with_store(Arc::new(store));

    harness.init();

    let data = harness.data();
    assert_eq!(data.last_visible_state, None);
    assert_eq!(data.last_alive_elapsed_wall_clock_ms, None);
    assert!(
        harness
            .reporter
            .events()
            .contains(&ReportedEvent::StoreFailed(StoreOperation::ReadPriorSession))
    );
}

#[rstest]
fn heartbeat_write_failures_are_reported_and_ignored() {
    let mut store = MockStore::new();
    store.expect_get().returning(|_| Ok(None));
    store
        .expect_set()
        .withf(|key, value| {
            key == LAST_ALIVE_KEY && *value == StoredValue::Integer(WALL_START_MS + 1_000)
        })
        .once()
        .returning(|_, _| {
            Err(StoreError::Write {
                path: PathBuf::from("state.json"),
                source: io::Error::other("read-only filesystem"),
            })
        });
    let harness = Harness::with_store(Arc::new(store));
    harness.init();

    harness.scheduler.advance(Duration::from_millis(1_000));

    assert!(
        harness
            .reporter
            .events()
            .contains(&ReportedEvent::StoreFailed(StoreOperation::RecordAlive))
    );
    assert_eq!(harness.scheduler.delayed(), 1);
}

fn collaborators_with(scheduler: MockScheduler) -> Collaborators {
    let clock = ManualClock::new(Uptime::from_millis(START_UPTIME_MS), WALL_START_MS);
    let mut store = MockStore::new();
    store.expect_get().returning(|_| Ok(None));
    Collaborators {
        process: Arc::new(StaticProcessInfo::new(sample_process())),
        lifecycle: Arc::new(ManualLifecycle::new()),
        upgrades: Arc::new(ManualUpgrades::new()),
        scheduler: Arc::new(scheduler),
        store: Arc::new(store),
        clock: Arc::new(clock),
        reporter: Arc::new(RecordingReporter::new()),
        anchor: ClockAnchor::at(Uptime::from_millis(START_UPTIME_MS)),
    }
}

#[rstest]
fn init_registers_one_of_each_scheduler_callback() {
    let mut scheduler = MockScheduler::new();
    scheduler.expect_is_coordination_thread().return_const(true);
    scheduler.expect_post().once().return_const(());
    scheduler.expect_post_at_front().once().return_const(());
    scheduler.expect_on_idle().once().return_const(());
    scheduler
        .expect_post_delayed()
        .withf(|delay, _| *delay == Duration::from_millis(250))
        .once()
        .return_const(());
    scheduler.expect_post_after_next_frame().never();

    let settings = crate::Settings {
        heartbeat_interval: Duration::from_millis(250),
        off_thread_policy: OffThreadPolicy::Ignore,
    };
    let app = AppStart::new(collaborators_with(scheduler), settings);
    app.init(&HostContext::application("mocked"));

    assert!(app.current_record().is_initialized());
}

#[rstest]
fn off_thread_init_registers_nothing() {
    let mut scheduler = MockScheduler::new();
    scheduler.expect_is_coordination_thread().return_const(false);
    scheduler.expect_post().never();
    scheduler.expect_post_at_front().never();
    scheduler.expect_on_idle().never();
    scheduler.expect_post_delayed().never();

    let app = AppStart::new(collaborators_with(scheduler), crate::Settings::default());
    app.init(&HostContext::application("mocked"));

    assert!(!app.current_record().is_initialized());
}
