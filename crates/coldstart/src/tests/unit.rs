//! Unit tests for initialization and checkpoint recording.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use coldstart_config::OffThreadPolicy;
use rstest::{fixture, rstest};
use serde_json::json;

use crate::test_support::{ReportedEvent, StaticProcessInfo};
use crate::{
    Checkpoint, HostContext, InitSkip, LAST_ALIVE_KEY, LAST_VISIBLE_STATE_CHANGED_KEY,
    LAST_VISIBLE_STATE_KEY, MemoryStore, NOT_YET_INITIALIZED, ProcessImportance,
    ImportanceSnapshot, StoredValue, Temperature, UpgradeInfo, UpgradeStatus, Visibility,
    WarmStartEvent, record_alive, record_visibility,
};

use super::support::{
    Harness, PROCESS_AGE_MS, PROCESS_START_MS, START_UPTIME_MS, WALL_START_MS, sample_process,
};

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[fixture]
fn initialized() -> Harness {
    let harness = Harness::new();
    harness.init();
    harness
}

#[rstest]
fn record_is_sentinel_before_init(harness: Harness) {
    assert_eq!(harness.reason().as_deref(), Some(NOT_YET_INITIALIZED));
    assert!(!harness.app_start.current_record().is_initialized());
}

#[rstest]
fn init_anchors_process_start_on_the_monotonic_clock(initialized: Harness) {
    let data = initialized.data();
    assert_eq!(data.pid, 4_242);
    assert_eq!(data.process_name, "sample-app");
    assert_eq!(data.process_start_uptime_ms, PROCESS_START_MS);
    assert_eq!(data.engine_init_called_elapsed_ms, PROCESS_AGE_MS);
    assert_eq!(data.first_app_code_loaded_elapsed_ms, 50);
    assert_eq!(
        data.process_start_wall_clock_ms,
        WALL_START_MS - i64::try_from(PROCESS_AGE_MS).expect("age fits")
    );
    assert_eq!(data.process_importance, Some(ProcessImportance::Foreground));
    assert_eq!(data.first_work_item_drained_elapsed_ms, None);
    assert_eq!(data.last_visible_state, None);
    assert_eq!(
        initialized.reporter.events().first(),
        Some(&ReportedEvent::Initialized(4_242))
    );
}

#[rstest]
fn init_registers_every_callback_once(initialized: Harness) {
    assert_eq!(initialized.scheduler.queued(), 2);
    assert_eq!(initialized.scheduler.idle_handlers(), 1);
    assert_eq!(initialized.scheduler.delayed(), 1);
    assert_eq!(initialized.lifecycle.registered(), 1);
    assert!(initialized.upgrades.is_registered());
}

#[rstest]
fn second_init_is_ignored(initialized: Harness) {
    initialized.init();
    assert_eq!(initialized.lifecycle.registered(), 1);
    assert!(
        initialized
            .reporter
            .events()
            .contains(&ReportedEvent::InitSkipped(InitSkip::AlreadyInitialized))
    );
}

#[rstest]
fn init_off_the_coordination_thread_is_ignored(harness: Harness) {
    thread::scope(|scope| {
        scope.spawn(|| harness.init());
    });
    assert_eq!(harness.reason().as_deref(), Some(NOT_YET_INITIALIZED));
    assert_eq!(harness.lifecycle.registered(), 0);
    assert_eq!(
        harness.reporter.events(),
        vec![ReportedEvent::InitSkipped(InitSkip::OffThread)]
    );

    harness.init();
    assert!(harness.app_start.current_record().is_initialized());
}

#[rstest]
fn component_context_leaves_record_uninitialized(harness: Harness) {
    harness
        .app_start
        .init(&HostContext::component("background service"));
    let reason = harness.reason().expect("sentinel reason");
    assert!(reason.contains("application context"), "reason: {reason}");
    assert!(reason.contains("background service"), "reason: {reason}");
    assert_eq!(harness.scheduler.queued(), 0);
    assert_eq!(harness.lifecycle.registered(), 0);
}

#[rstest]
fn process_info_failure_is_recorded_as_reason() {
    let harness = Harness::with_process(StaticProcessInfo::failing("procfs is not mounted"));
    harness.init();
    let reason = harness.reason().expect("sentinel reason");
    assert!(reason.contains("procfs is not mounted"), "reason: {reason}");
    assert!(!harness.upgrades.is_registered());
    assert!(matches!(
        harness.reporter.events().as_slice(),
        [ReportedEvent::InitFailed(_)]
    ));
}

#[rstest]
fn sub_millisecond_process_start_keeps_checkpoints_on_the_uptime_grid() {
    let mut info = sample_process();
    info.elapsed_since_start = Duration::from_micros(400_600);
    let harness = Harness::with_process(StaticProcessInfo::new(info));
    harness.init();
    harness.scheduler.advance(Duration::from_millis(120));

    let data = harness.data();
    assert_eq!(data.process_start_uptime_ms, START_UPTIME_MS - 401);
    assert_eq!(
        data.process_start_uptime_ms + data.engine_init_called_elapsed_ms,
        START_UPTIME_MS
    );
    assert_eq!(
        data.first_work_item_drained_elapsed_ms
            .map(|elapsed| data.process_start_uptime_ms + elapsed),
        Some(START_UPTIME_MS + 120)
    );
}

#[rstest]
fn checkpoints_are_monotonic_deltas_from_process_start(initialized: Harness) {
    initialized.scheduler.advance(Duration::from_millis(100));
    let drained_at = initialized.elapsed_now();

    initialized.clock.advance(Duration::from_millis(50));
    assert_eq!(initialized.scheduler.run_idle(), 1);
    let idle_at = initialized.elapsed_now();

    initialized.app_start.report_ready();
    initialized.clock.advance(Duration::from_millis(30));
    assert_eq!(initialized.scheduler.render_frame(), 1);
    let frame_at = initialized.elapsed_now();

    let data = initialized.data();
    assert_eq!(data.first_priority_work_item_elapsed_ms, Some(drained_at));
    assert_eq!(data.first_work_item_drained_elapsed_ms, Some(drained_at));
    assert_eq!(data.first_idle_elapsed_ms, Some(idle_at));
    assert_eq!(data.first_frame_after_ready_elapsed_ms, Some(frame_at));
    assert_eq!((drained_at, idle_at, frame_at), (500, 550, 580));
}

#[rstest]
fn idle_handler_unregisters_after_first_idle(initialized: Harness) {
    assert_eq!(initialized.scheduler.run_idle(), 1);
    assert_eq!(initialized.scheduler.idle_handlers(), 0);
}

#[rstest]
fn first_work_item_takes_second_importance_snapshot(initialized: Harness) {
    initialized
        .process
        .set_importance(Some(ImportanceSnapshot::new(ProcessImportance::Cached)));
    initialized.scheduler.drain();
    let data = initialized.data();
    assert_eq!(data.process_importance, Some(ProcessImportance::Foreground));
    assert_eq!(
        data.process_importance_after_first_work_item,
        Some(ProcessImportance::Cached)
    );
}

#[rstest]
fn repeated_checkpoints_keep_the_first_value(initialized: Harness) {
    let app = &initialized.app_start;
    app.first_component_instantiated("MainScreen");
    app.custom_first_event("feed_loaded", Some(json!({ "items": 3 })));
    let first = initialized.data();

    initialized.clock.advance(Duration::from_millis(75));
    app.first_component_instantiated("SettingsScreen");
    app.custom_first_event("feed_loaded", Some(json!({ "items": 9 })));
    app.report_ready();
    app.report_ready();

    let data = initialized.data();
    assert_eq!(data.first_component_instantiated, first.first_component_instantiated);
    assert_eq!(data.custom_first_events, first.custom_first_events);
    assert_eq!(data.custom_first_events.len(), 1);
    let event = data
        .custom_first_events
        .get("feed_loaded")
        .expect("event recorded");
    assert_eq!(event.payload, Some(json!({ "items": 3 })));
    assert_eq!(initialized.scheduler.frame_callbacks(), 1);
}

#[rstest]
fn checkpoints_before_init_are_ignored(harness: Harness) {
    harness.app_start.custom_first_event("early", None);
    harness.app_start.report_ready();
    assert_eq!(harness.scheduler.frame_callbacks(), 0);

    harness.init();
    harness.app_start.custom_first_event("early", None);
    assert!(harness.data().custom_first_events.contains_key("early"));
}

#[rstest]
fn off_thread_checkpoints_are_dropped_under_ignore_policy(initialized: Harness) {
    thread::scope(|scope| {
        scope.spawn(|| {
            initialized.app_start.custom_first_event("remote", None);
            initialized.app_start.first_component_instantiated("Remote");
        });
    });
    let data = initialized.data();
    assert!(data.custom_first_events.is_empty());
    assert!(data.first_component_instantiated.is_none());
    assert!(initialized.reporter.events().contains(&ReportedEvent::OffThreadCall(
        Checkpoint::CustomFirstEvent {
            name: "remote".to_owned()
        }
    )));
}

#[rstest]
fn off_thread_checkpoints_panic_under_panic_policy() {
    let harness = Harness::with_policy(OffThreadPolicy::Panic);
    harness.init();
    let outcome = thread::scope(|scope| {
        scope
            .spawn(|| harness.app_start.report_ready())
            .join()
    });
    assert!(outcome.is_err());
    assert_eq!(harness.scheduler.frame_callbacks(), 0);
}

#[rstest]
fn prior_session_is_read_with_wall_clock_deltas() {
    let store = MemoryStore::new();
    record_visibility(&store, Visibility::Visible, WALL_START_MS - 2_000).expect("visibility");
    record_alive(&store, WALL_START_MS - 500).expect("alive");

    let harness = Harness::with_store(Arc::new(store));
    harness.init();
    let data = harness.data();
    assert_eq!(data.last_visible_state, Some(Visibility::Visible));
    assert_eq!(
        data.last_visible_state_changed_elapsed_wall_clock_ms,
        Some(2_000)
    );
    assert_eq!(data.last_alive_elapsed_wall_clock_ms, Some(500));
}

#[rstest]
fn visibility_survives_into_the_next_process() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let first = Harness::with_store(store.clone());
    first.init();
    first
        .lifecycle
        .notify(Visibility::Visible, Temperature::Cold);

    let second = Harness::with_store(store);
    second.clock.set_wall_clock(WALL_START_MS + 9_000);
    second.init();
    let data = second.data();
    assert_eq!(data.last_visible_state, Some(Visibility::Visible));
    assert_eq!(
        data.last_visible_state_changed_elapsed_wall_clock_ms,
        Some(9_000)
    );
}

#[rstest]
fn every_transition_is_persisted(initialized: Harness) {
    initialized
        .lifecycle
        .notify(Visibility::NotVisible, Temperature::Unknown);
    let store = &initialized.store;
    assert_eq!(
        store.get(LAST_VISIBLE_STATE_KEY).expect("get"),
        Some(StoredValue::Text("NOT_VISIBLE".to_owned()))
    );
    assert_eq!(
        store.get(LAST_VISIBLE_STATE_CHANGED_KEY).expect("get"),
        Some(StoredValue::Integer(WALL_START_MS))
    );

    initialized.clock.advance(Duration::from_millis(40));
    initialized
        .lifecycle
        .notify(Visibility::NotVisible, Temperature::Unknown);
    assert_eq!(
        store.get(LAST_VISIBLE_STATE_CHANGED_KEY).expect("get"),
        Some(StoredValue::Integer(WALL_START_MS))
    );
}

#[rstest]
fn visible_during_cold_start_is_never_a_warm_start(initialized: Harness) {
    let events = initialized.collect_warm_starts();
    initialized
        .lifecycle
        .notify(Visibility::NotVisible, Temperature::Cold);
    initialized
        .lifecycle
        .notify(Visibility::Visible, Temperature::Cold);
    initialized.scheduler.drain();
    initialized.clock.advance(Duration::from_millis(16));
    initialized.scheduler.render_frame();

    assert!(events.lock().expect("events").is_empty());
    assert!(
        !initialized
            .reporter
            .events()
            .iter()
            .any(|event| matches!(event, ReportedEvent::WarmStart(_)))
    );
}

#[rstest]
fn resume_after_first_work_item_reports_warm_start_once(initialized: Harness) {
    let events = initialized.collect_warm_starts();
    initialized.scheduler.drain();
    initialized
        .lifecycle
        .notify(Visibility::Visible, Temperature::Cold);

    initialized.clock.advance(Duration::from_millis(200));
    initialized
        .lifecycle
        .notify(Visibility::NotVisible, Temperature::Unknown);
    initialized.clock.advance(Duration::from_millis(1_500));
    initialized
        .lifecycle
        .notify(Visibility::Visible, Temperature::Hot);
    initialized.clock.advance(Duration::from_millis(16));
    assert_eq!(initialized.scheduler.render_frame(), 1);
    assert_eq!(initialized.scheduler.render_frame(), 0);

    let expected = WarmStartEvent {
        temperature: Temperature::Hot,
        background_elapsed: Duration::from_millis(1_500),
        resume_to_next_frame: Duration::from_millis(16),
    };
    assert_eq!(*events.lock().expect("events"), vec![expected]);
}

#[rstest]
fn warm_start_is_computed_without_a_listener(initialized: Harness) {
    initialized.scheduler.drain();
    initialized
        .lifecycle
        .notify(Visibility::NotVisible, Temperature::Unknown);
    initialized.clock.advance(Duration::from_millis(300));
    initialized
        .lifecycle
        .notify(Visibility::Visible, Temperature::Warm);
    initialized.scheduler.render_frame();

    assert!(initialized.reporter.events().contains(&ReportedEvent::WarmStart(
        WarmStartEvent {
            temperature: Temperature::Warm,
            background_elapsed: Duration::from_millis(300),
            resume_to_next_frame: Duration::ZERO,
        }
    )));
}

#[rstest]
fn last_listener_wins(initialized: Harness) {
    let replaced = initialized.collect_warm_starts();
    let current = initialized.collect_warm_starts();
    initialized.scheduler.drain();
    initialized
        .lifecycle
        .notify(Visibility::NotVisible, Temperature::Unknown);
    initialized
        .lifecycle
        .notify(Visibility::Visible, Temperature::Hot);
    initialized.scheduler.render_frame();

    assert!(replaced.lock().expect("events").is_empty());
    assert_eq!(current.lock().expect("events").len(), 1);
}

#[rstest]
fn heartbeat_rewrites_last_alive_and_reschedules(initialized: Harness) {
    initialized.scheduler.advance(Duration::from_millis(1_000));
    assert_eq!(
        initialized.store.get(LAST_ALIVE_KEY).expect("get"),
        Some(StoredValue::Integer(WALL_START_MS + 1_000))
    );
    assert_eq!(initialized.scheduler.delayed(), 1);

    initialized.scheduler.advance(Duration::from_millis(1_000));
    assert_eq!(
        initialized.store.get(LAST_ALIVE_KEY).expect("get"),
        Some(StoredValue::Integer(WALL_START_MS + 2_000))
    );
}

#[rstest]
fn upgrade_details_merge_through_the_scheduler(initialized: Harness) {
    let info = UpgradeInfo {
        status: UpgradeStatus::Upgraded,
        previous_version: Some("1.4.2".to_owned()),
    };
    assert!(initialized.upgrades.deliver(info.clone().into_mutator()));
    assert_eq!(initialized.data().upgrade, None);

    initialized.scheduler.drain();
    assert_eq!(initialized.data().upgrade, Some(info));
    assert!(
        initialized
            .reporter
            .events()
            .contains(&ReportedEvent::UpgradeMerged)
    );
}

#[rstest]
fn upgrade_detection_waits_for_init(harness: Harness) {
    let info = UpgradeInfo {
        status: UpgradeStatus::FreshInstall,
        previous_version: None,
    };
    assert!(!harness.upgrades.deliver(info.into_mutator()));
}

#[rstest]
fn readers_on_other_threads_see_whole_snapshots(initialized: Harness) {
    let app = initialized.app_start.clone();
    let reader = thread::spawn(move || {
        (0..100)
            .map(|_| app.current_record())
            .all(|record| record.is_initialized())
    });
    initialized.scheduler.drain();
    initialized.app_start.custom_first_event("burst", None);
    assert!(reader.join().expect("reader thread"));
}
