//! Integration tests for timer persistence over the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use jobtimer_core::error::{CoreError, PersistenceError, StoreError};
use jobtimer_core::events::Event;
use jobtimer_core::store::{DocumentStore, MemoryStore, SqliteStore};
use jobtimer_core::sync::{ResolutionKind, SyncState};
use jobtimer_core::timer::{CompletionData, CompletionReason, NewTimer, TimerUpdate};
use jobtimer_core::{PersistenceOptions, TimerPersistence};

fn new_timer(key: Option<&str>) -> NewTimer {
    NewTimer {
        user_id: "u1".into(),
        project_id: "p1".into(),
        job_card_id: "jc1".into(),
        job_card_title: "Panel wiring".into(),
        allocated_hours: 2.0,
        time_remaining: Some(7200),
        device_id: "jobtimer-test".into(),
        start_running: true,
        idempotency_key: key.map(str::to_string),
    }
}

fn setup() -> (Arc<MemoryStore>, TimerPersistence) {
    let store = Arc::new(MemoryStore::new());
    let persistence = TimerPersistence::new(store.clone(), PersistenceOptions::default());
    (store, persistence)
}

fn pause_update() -> TimerUpdate {
    TimerUpdate {
        time_remaining: Some(6000),
        is_paused: Some(true),
        pause_count: Some(1),
        ..Default::default()
    }
}

#[test]
fn test_optimistic_update_bumps_version() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    assert!(id.starts_with("timer_u1_p1_"));
    assert_eq!(store.get(&id).unwrap().unwrap().sync_version, 1);

    assert!(persistence.update_timer(&id, pause_update(), true).unwrap());

    let stored = store.get(&id).unwrap().unwrap();
    assert_eq!(stored.sync_version, 2);
    assert_eq!(stored.time_remaining, 6000);
    assert!(stored.is_paused);
    assert_eq!(persistence.sync_state(&id), Some(&SyncState::Clean));
}

#[test]
fn test_failed_optimistic_write_is_queued_then_retried() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    persistence.drain_events();

    store.fail_next_writes(1);
    assert!(!persistence.update_timer(&id, pause_update(), true).unwrap());

    assert_eq!(persistence.local_state(&id).unwrap().time_remaining, 6000);
    assert!(persistence.sync_state(&id).unwrap().is_dirty());
    assert_eq!(persistence.pending_retries(), 1);
    assert_eq!(store.get(&id).unwrap().unwrap().sync_version, 1);
    assert!(matches!(
        persistence.drain_events().as_slice(),
        [Event::WriteQueued { .. }]
    ));

    let report = persistence.process_retries(Utc::now() + Duration::seconds(5));
    assert_eq!(report.succeeded, vec![id.clone()]);
    assert_eq!(persistence.pending_retries(), 0);
    assert_eq!(persistence.sync_state(&id), Some(&SyncState::Clean));

    let stored = store.get(&id).unwrap().unwrap();
    assert_eq!(stored.sync_version, 2);
    assert_eq!(stored.time_remaining, 6000);
}

#[test]
fn test_retry_exhaustion_reported_once() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    store.set_offline(true);
    assert!(!persistence.update_timer(&id, pause_update(), true).unwrap());

    let start = Utc::now();
    let mut exhausted = Vec::new();
    for minute in 1..=5 {
        let report = persistence.process_retries(start + Duration::minutes(minute));
        exhausted.extend(report.exhausted);
    }

    assert_eq!(exhausted, vec![id.clone()]);
    assert_eq!(persistence.pending_retries(), 0);
    let terminal: Vec<_> = persistence
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::RetryExhausted { .. }))
        .collect();
    assert_eq!(terminal.len(), 1);
    match &terminal[0] {
        Event::RetryExhausted { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_newer_optimistic_write_supersedes_queued_one() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    store.fail_next_writes(1);
    assert!(!persistence.update_timer(&id, pause_update(), true).unwrap());
    let update = TimerUpdate {
        time_remaining: Some(5000),
        ..Default::default()
    };
    assert!(persistence.update_timer(&id, update, true).unwrap());

    assert_eq!(persistence.pending_retries(), 0);
    let stored = store.get(&id).unwrap().unwrap();
    assert_eq!(stored.sync_version, 3);
    assert_eq!(stored.time_remaining, 5000);
}

#[test]
fn test_initialize_is_idempotent_per_key() {
    let (store, mut persistence) = setup();
    let first = persistence.initialize_timer(new_timer(Some("req-1"))).unwrap();
    let second = persistence.initialize_timer(new_timer(Some("req-1"))).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.commit_count(), 1);
}

#[test]
fn test_idempotency_key_holds_across_instances() {
    let store = Arc::new(MemoryStore::new());
    let mut first = TimerPersistence::new(store.clone(), PersistenceOptions::default());
    let mut second = TimerPersistence::new(store.clone(), PersistenceOptions::default());

    let id1 = first.initialize_timer(new_timer(Some("k1"))).unwrap();
    let id2 = second.initialize_timer(new_timer(Some("k1"))).unwrap();

    assert_eq!(id1, id2);
    assert_eq!(store.query_by_user("u1", None).unwrap().len(), 1);
    assert_eq!(store.commit_count(), 1);
    assert_eq!(second.local_state(&id2).map(|t| t.sync_version), Some(1));
}

#[test]
fn test_rapid_initializations_never_overwrite() {
    let (store, mut persistence) = setup();

    let mut ids = std::collections::HashSet::new();
    for n in 0..50 {
        let mut timer = new_timer(None);
        timer.job_card_id = format!("jc{n}");
        ids.insert(persistence.initialize_timer(timer).unwrap());
    }
    for _ in 0..50 {
        ids.insert(persistence.initialize_timer(new_timer(None)).unwrap());
    }

    assert_eq!(ids.len(), 100);
    assert_eq!(store.query_by_user("u1", None).unwrap().len(), 100);
    assert!(ids.iter().any(|id| id.contains("_jc7_")));
}

#[test]
fn test_initialize_failure_caches_nothing() {
    let (store, mut persistence) = setup();
    store.fail_next_writes(1);

    let err = persistence
        .initialize_timer(new_timer(Some("req-2")))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Persistence(PersistenceError::InitializeFailed { .. })
    ));
    assert!(persistence.drain_events().is_empty());

    let id = persistence.initialize_timer(new_timer(Some("req-2"))).unwrap();
    assert!(store.get(&id).unwrap().is_some());
}

#[test]
fn test_initialize_rejects_bad_allocation() {
    let (_store, mut persistence) = setup();
    let mut timer = new_timer(None);
    timer.allocated_hours = 0.0;
    assert!(matches!(
        persistence.initialize_timer(timer),
        Err(CoreError::Validation(_))
    ));
}

#[test]
fn test_stale_checked_update_resolves_last_write_wins() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    // Another device advanced the document to version 3.
    let mut remote = store.get(&id).unwrap().unwrap();
    remote.sync_version = 3;
    remote.time_remaining = 6500;
    remote.last_updated = Utc::now();
    store.put(&remote).unwrap();
    persistence.drain_events();

    let stale = TimerUpdate {
        time_remaining: Some(6480),
        sync_version: Some(1),
        last_updated: Some(remote.last_updated - Duration::minutes(10)),
        ..Default::default()
    };
    assert!(persistence.update_timer(&id, stale, false).unwrap());

    let stored = store.get(&id).unwrap().unwrap();
    assert_eq!(stored.sync_version, 4);
    assert_eq!(stored.time_remaining, 6500);

    let events = persistence.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ConflictResolved {
            kind: ResolutionKind::RemoteWins,
            sync_version: 4,
            ..
        }
    )));
}

#[test]
fn test_checked_update_without_conflict() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    let update = TimerUpdate {
        time_remaining: Some(7190),
        ..Default::default()
    };
    assert!(persistence.update_timer(&id, update, false).unwrap());
    assert_eq!(store.get(&id).unwrap().unwrap().sync_version, 2);
    assert!(!persistence
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::ConflictResolved { .. })));
}

#[test]
fn test_checked_update_carries_queued_optimistic_write() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    store.fail_next_writes(1);
    let tick = TimerUpdate {
        time_remaining: Some(7150),
        ..Default::default()
    };
    assert!(!persistence.update_timer(&id, tick, true).unwrap());
    assert_eq!(persistence.pending_retries(), 1);

    let rename = TimerUpdate {
        job_card_title: Some("Renamed".into()),
        ..Default::default()
    };
    assert!(persistence.update_timer(&id, rename, false).unwrap());

    let stored = store.get(&id).unwrap().unwrap();
    assert_eq!(stored.time_remaining, 7150);
    assert_eq!(stored.job_card_title, "Renamed");
    assert_eq!(stored.sync_version, 2);
    assert_eq!(persistence.local_state(&id).unwrap().time_remaining, 7150);
    assert_eq!(persistence.pending_retries(), 0);
    assert_eq!(persistence.sync_state(&id), Some(&SyncState::Clean));
}

#[test]
fn test_rejected_checked_update_keeps_queued_write() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    store.fail_next_writes(1);
    let tick = TimerUpdate {
        time_remaining: Some(7150),
        ..Default::default()
    };
    assert!(!persistence.update_timer(&id, tick, true).unwrap());

    store.fail_next_writes(1);
    let rename = TimerUpdate {
        job_card_title: Some("Renamed".into()),
        ..Default::default()
    };
    assert!(!persistence.update_timer(&id, rename, false).unwrap());

    assert_eq!(persistence.pending_retries(), 1);
    assert!(persistence.sync_state(&id).unwrap().is_dirty());
    assert_eq!(persistence.local_state(&id).unwrap().time_remaining, 7150);

    let report = persistence.process_retries(Utc::now() + Duration::seconds(5));
    assert_eq!(report.succeeded, vec![id.clone()]);
    assert_eq!(store.get(&id).unwrap().unwrap().time_remaining, 7150);
}

#[test]
fn test_update_unknown_timer_is_not_found() {
    let (_store, mut persistence) = setup();
    let err = persistence
        .update_timer("timer_x", TimerUpdate::default(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Persistence(PersistenceError::NotFound(_))
    ));
}

#[test]
fn test_complete_archives_and_removes() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    let now = Utc::now();
    persistence
        .reserve_slot(&id, now, now + Duration::hours(2))
        .unwrap();
    assert_eq!(store.reservations_for(&id).unwrap().len(), 1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _handle = persistence
        .listen_to_timer(
            &id,
            move |state| sink.lock().unwrap().push(state.is_some()),
            |_| {},
        )
        .unwrap();

    let data = CompletionData {
        reason: CompletionReason::Finished,
        time_remaining: Some(600),
        notes: Some("done".into()),
    };
    assert!(persistence.complete_timer(&id, data).unwrap());

    assert!(persistence.get_timer(&id).unwrap().is_none());
    assert!(store.reservations_for(&id).unwrap().is_empty());
    let logs = store.logs_for_timer(&id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].time_spent_secs, 6600);
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
}

#[test]
fn test_failed_completion_leaves_timer_untouched() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    store.fail_next_writes(1);
    assert!(!persistence
        .complete_timer(&id, CompletionData::default())
        .unwrap());

    assert!(store.get(&id).unwrap().is_some());
    assert!(store.logs_for_timer(&id).unwrap().is_empty());
}

#[test]
fn test_unsubscribe_is_idempotent_and_stops_delivery() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = persistence
        .listen_to_timer(
            &id,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        )
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    persistence.update_timer(&id, pause_update(), true).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    handle.unsubscribe();
    handle.unsubscribe();
    assert!(!handle.is_active());
    assert_eq!(store.subscriber_count(), 0);

    persistence.update_timer(&id, pause_update(), true).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_listener_errors_reach_callback_and_events() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    persistence.drain_events();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let _handle = persistence
        .listen_to_timer(&id, |_| {}, move |e| sink.lock().unwrap().push(e))
        .unwrap();

    store.inject_listener_error(&id, StoreError::Unavailable("socket closed".into()));

    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(matches!(
        persistence.drain_events().as_slice(),
        [Event::ListenerError { .. }]
    ));
}

#[test]
fn test_rejected_subscription_is_an_error() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    store.reject_subscriptions(true);

    let err = persistence
        .listen_to_timer(&id, |_| {}, |_| {})
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Persistence(PersistenceError::ListenFailed { .. })
    ));
}

#[test]
fn test_shutdown_releases_listeners() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    let handle = persistence.listen_to_timer(&id, |_| {}, |_| {}).unwrap();
    assert_eq!(store.subscriber_count(), 1);

    persistence.shutdown();
    assert_eq!(store.subscriber_count(), 0);
    assert!(!handle.is_active());
}

#[test]
fn test_remote_snapshot_reconciles_dirty_timer() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    store.fail_next_writes(1);
    assert!(!persistence.update_timer(&id, pause_update(), true).unwrap());

    let mut remote = store.get(&id).unwrap().unwrap();
    remote.sync_version = 5;
    remote.time_remaining = 6900;
    remote.last_updated = Utc::now() - Duration::minutes(30);
    store.put(&remote).unwrap();

    let resolution = persistence.reconcile_remote(&remote).unwrap();
    assert_eq!(resolution.kind, ResolutionKind::LocalWins);
    assert_eq!(resolution.resolved.sync_version, 6);

    assert_eq!(persistence.sync_state(&id), Some(&SyncState::Clean));
    assert_eq!(persistence.pending_retries(), 0);
    let stored = store.get(&id).unwrap().unwrap();
    assert_eq!(stored.sync_version, 6);
    assert_eq!(stored.time_remaining, 6000);
}

#[test]
fn test_clean_timer_adopts_remote_snapshot() {
    let (store, mut persistence) = setup();
    let id = persistence.initialize_timer(new_timer(None)).unwrap();

    let mut remote = store.get(&id).unwrap().unwrap();
    remote.sync_version = 2;
    remote.time_remaining = 7000;
    assert!(persistence.reconcile_remote(&remote).is_none());
    assert_eq!(persistence.local_state(&id).unwrap().time_remaining, 7000);
}

#[test]
fn test_active_timers_are_recent_first() {
    let (_store, mut persistence) = setup();
    let mut first = new_timer(None);
    first.project_id = "p1".into();
    let a = persistence.initialize_timer(first).unwrap();
    let mut second = new_timer(None);
    second.project_id = "p2".into();
    let b = persistence.initialize_timer(second).unwrap();

    persistence
        .update_timer(&a, TimerUpdate::default(), true)
        .unwrap();

    let active = persistence.get_active_timers("u1", None).unwrap();
    let ids: Vec<_> = active.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, vec![a.clone(), b]);

    assert_eq!(persistence.get_active_timers("u1", Some(1)).unwrap().len(), 1);
    assert!(persistence.get_active_timers("nobody", None).unwrap().is_empty());
}

#[test]
fn test_persistence_over_sqlite() {
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let mut persistence = TimerPersistence::new(store.clone(), PersistenceOptions::default());

    let id = persistence.initialize_timer(new_timer(None)).unwrap();
    assert!(persistence.update_timer(&id, pause_update(), true).unwrap());
    assert_eq!(store.get(&id).unwrap().unwrap().sync_version, 2);

    assert!(persistence
        .complete_timer(&id, CompletionData::default())
        .unwrap());
    assert!(store.get(&id).unwrap().is_none());
    assert_eq!(store.logs_for_timer(&id).unwrap().len(), 1);
}
