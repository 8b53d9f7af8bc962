use std::sync::{Arc, atomic::Ordering};

use guardsync::{
    Clock, ErrorCode, FixedClock, InMemoryClientApi, SyncConfig, Topic,
    audit::MemoryAuditLogger,
};
use serde_json::json;

use crate::helpers::{GatedAdminApi, Harness, T0_MS, build_service, drain, property};

#[tokio::test]
async fn triggers_during_a_cycle_coalesce_into_one_rerun() {
    let admin = Arc::new(GatedAdminApi::new());
    let service = build_service(
        admin.clone(),
        Arc::new(InMemoryClientApi::new()),
        Arc::new(MemoryAuditLogger::new()),
        Arc::new(FixedClock::new(T0_MS)),
        SyncConfig::default(),
    );

    let running = service.clone();
    let first = tokio::spawn(async move { running.trigger_sync("first").await });
    admin.entered.notified().await;

    assert!(service.get_sync_statistics().is_syncing);
    assert!(service.trigger_sync("second").await.is_coalesced());
    assert!(service.perform_synchronization().await.is_coalesced());

    admin.release.add_permits(2);
    let outcome = first.await.unwrap();

    assert_eq!(outcome.reports().len(), 2);
    assert!(outcome.reports().iter().all(|report| report.is_success()));
    assert_eq!(admin.calls.load(Ordering::SeqCst), 2);
    assert_eq!(admin.max_in_flight.load(Ordering::SeqCst), 1);

    let stats = service.get_sync_statistics();
    assert!(!stats.is_syncing);
    assert_eq!(stats.cycles_completed, 2);
}

#[tokio::test]
async fn cycle_processes_queue_before_reconciling() {
    let h = Harness::new();
    h.admin.insert(property("P1", 1, 0));
    h.queue(h.event(
        "property_created",
        Some("P2"),
        json!({ "name": "Yard", "version": 1 }),
    ));
    let mut rx = h.service.subscribe();

    let outcome = h.service.perform_synchronization().await;

    let [report] = outcome.reports() else {
        panic!("expected a single cycle, got {outcome:?}");
    };
    assert!(report.is_success());
    assert_eq!(report.events.len(), 1);
    let summary = report.reconcile.as_ref().unwrap();
    assert_eq!(summary.properties_checked, 2);
    // P1 was new to the client side; P2 was written there by its event.
    assert_eq!(summary.mirrored, 1);
    assert_eq!(summary.in_sync, 1);

    let completed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|n| n.topic == Topic::SyncCompleted)
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].payload["count"], 2);
    assert_eq!(completed[0].payload["eventsProcessed"], 1);
    assert!(completed[0].payload["duration"].is_u64());

    let stats = h.service.get_sync_statistics();
    assert_eq!(stats.last_sync, Some(h.clock.now()));
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.admin_cache_size, 2);
    assert_eq!(stats.client_cache_size, 2);
    assert_eq!(stats.pending_events, 0);
}

#[tokio::test]
async fn unreachable_admin_side_fails_the_cycle() {
    let h = Harness::new();
    h.admin.set_unavailable(true);
    let mut rx = h.service.subscribe();

    let outcome = h.service.perform_synchronization().await;

    let report = &outcome.reports()[0];
    assert!(!report.is_success());
    assert_eq!(report.error.as_ref().unwrap().code, ErrorCode::FullSyncError);
    let published = drain(&mut rx);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, Topic::SyncError);
    assert_eq!(published[0].payload["type"], "full_sync_error");

    let stats = h.service.get_sync_statistics();
    assert_eq!(stats.last_sync, None);
    assert_eq!(stats.cycles_completed, 0);
    assert!(!stats.is_syncing);
}

#[tokio::test]
async fn statistics_reflect_configuration_and_idle_state() {
    let h = Harness::with_config(SyncConfig {
        sync_interval_secs: 45,
        ..SyncConfig::default()
    });

    let stats = h.service.get_sync_statistics();
    assert_eq!(stats.sync_interval_secs, 45);
    assert!(!stats.is_active);
    assert!(!stats.is_syncing);
    assert_eq!(stats.last_sync, None);
    assert_eq!(stats.events_processed, 0);
    assert_eq!(stats.latest_health_at, None);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["syncIntervalSecs"], 45);
    assert!(json["lastSync"].is_null());
}
