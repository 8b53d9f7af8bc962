use guardsync::{
    AuthToken, Clock, ErrorCode, HandlerContext, Topic, conflict::ResolvedBy, model::ClientPropertyData,
};
use serde_json::json;

use crate::helpers::{CLIENT, Harness, USER, at, context_for, drain, property};

#[tokio::test]
async fn stale_update_keeps_stored_version_on_both_sides() {
    let h = Harness::new();
    h.admin.insert(property("P1", 5, -60));
    let mut rx = h.service.subscribe();

    h.queue(h.event(
        "property_updated",
        Some("P1"),
        json!({ "name": "Stale name", "version": 2 }),
    ));
    let results = h.service.process_pending_events().await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success, "{:?}", result.error);
    assert!(!result.conflicts.is_empty());
    let resolution = result.conflicts[0].resolution.as_ref().unwrap();
    assert_eq!(resolution.resolved_by, ResolvedBy::AdminPriority);
    assert_eq!(resolution.data.resolved_by.as_deref(), Some("admin_priority"));

    assert!(h.admin.writes().iter().all(|written| written.version != 2));
    assert_eq!(h.admin.get("P1").unwrap().version, 5);
    assert_eq!(h.client.get("P1").unwrap().version, 5);
    assert_eq!(h.client.get("P1").unwrap().name, "Property P1");

    let published = drain(&mut rx);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, Topic::PropertySynced);
    assert_eq!(published[0].action(), Some("conflict_resolved"));
    assert_eq!(h.service.get_sync_statistics().conflicts_resolved, 1);
}

#[tokio::test]
async fn emergency_notification_precedes_incident_notification() {
    let h = Harness::new();
    h.admin.insert(property("P2", 1, 0));
    let mut rx = h.service.subscribe();

    h.queue(h.event(
        "incident_created",
        Some("P2"),
        json!({ "type": "intrusion", "severity": "emergency" }),
    ));
    let results = h.service.process_pending_events().await;
    assert!(results[0].success, "{:?}", results[0].error);

    let topics: Vec<_> = drain(&mut rx)
        .into_iter()
        .map(|n| (n.topic, n.action().map(str::to_string)))
        .collect();
    assert_eq!(
        topics,
        vec![
            (Topic::EmergencyIncident, Some("emergency".to_string())),
            (Topic::IncidentRelated, Some("created".to_string())),
        ]
    );
}

#[tokio::test]
async fn unknown_event_type_is_reported_not_retried() {
    let h = Harness::new();
    let mut rx = h.service.subscribe();

    h.queue(h.event("teleport_requested", Some("P1"), json!({})));
    let results = h.service.process_pending_events().await;

    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.handler, None);
    assert_eq!(result.event_type, "teleport_requested");
    assert_eq!(
        result.error.as_ref().unwrap().code,
        ErrorCode::UnsupportedEventType
    );
    assert_eq!(h.service.pending_events(), 0);
    assert!(h.service.dead_letters().is_empty());

    let published = drain(&mut rx);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, Topic::SyncError);
    assert_eq!(published[0].payload["type"], "UNSUPPORTED_EVENT_TYPE");
    assert_eq!(published[0].payload["eventType"], "teleport_requested");
    assert_eq!(h.service.get_sync_statistics().events_failed, 1);
}

#[tokio::test]
async fn redelivered_event_replays_recorded_result() {
    let h = Harness::new();
    let event = h.event(
        "property_created",
        Some("P3"),
        json!({ "name": "Depot", "version": 1 }),
    );
    let context = context_for(&event);

    let first = h.service.process_event(event.clone(), context.clone()).await;
    assert!(first.success, "{:?}", first.error);
    assert!(!first.replayed);

    h.service.queue_sync_event(event.clone(), context.clone());
    let queued = h.service.process_pending_events().await;
    let direct = h.service.process_event(event, context).await;

    for replay in [&queued[0], &direct] {
        assert!(replay.replayed);
        assert!(replay.success);
        assert_eq!(replay.event_id, first.event_id);
    }
    assert_eq!(h.admin.writes().len(), 1);
    assert_eq!(h.client.writes().len(), 1);
    assert_eq!(h.service.get_sync_statistics().events_processed, 1);
}

#[tokio::test]
async fn created_property_lands_on_both_sides() {
    let h = Harness::new();
    let mut rx = h.service.subscribe();

    h.queue(h.event(
        "property_created",
        Some("P3"),
        json!({ "name": "Depot", "address": "9 Rail St", "version": 1 }),
    ));
    let results = h.service.process_pending_events().await;
    assert!(results[0].success, "{:?}", results[0].error);

    let admin = h.admin.get("P3").unwrap();
    assert_eq!(admin.address, "9 Rail St");
    assert_eq!(admin.synced_at, Some(at(0)));
    let client = h.client.get("P3").unwrap();
    assert_eq!(client.name, "Depot");
    assert_eq!(client.version, 1);
    assert!(h.service.cached_property("P3").is_some());
    assert!(h.service.cached_client_property("P3").is_some());

    let published = drain(&mut rx);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].action(), Some("created"));
}

#[tokio::test]
async fn image_changes_update_client_list_and_admin_summary() {
    let h = Harness::new();
    h.admin.insert(property("P1", 1, 0));

    h.queue(h.event(
        "images_uploaded",
        Some("P1"),
        json!([
            { "id": "a", "url": "https://cdn.example/a.jpg", "uploadedAt": at(-30) },
            { "id": "b", "url": "https://cdn.example/b.jpg", "uploadedAt": at(-10), "isPrimary": true },
        ]),
    ));
    let results = h.service.process_pending_events().await;
    assert!(results[0].success, "{:?}", results[0].error);

    assert_eq!(h.client.get("P1").unwrap().images.len(), 2);
    let summary = h.admin.get("P1").unwrap().images;
    assert_eq!(summary.image_count, 2);
    assert_eq!(summary.primary_image.as_deref(), Some("https://cdn.example/b.jpg"));
    assert_eq!(summary.last_image_update, Some(at(-10)));

    h.queue(h.event("images_deleted", Some("P1"), json!(["b"])));
    let results = h.service.process_pending_events().await;
    assert!(results[0].success, "{:?}", results[0].error);

    let images = h.client.get("P1").unwrap().images;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, "a");
    let summary = h.admin.get("P1").unwrap().images;
    assert_eq!(summary.image_count, 1);
    assert_eq!(summary.primary_image.as_deref(), Some("https://cdn.example/a.jpg"));
}

#[tokio::test]
async fn deleted_property_is_removed_everywhere() {
    let h = Harness::new();
    let stored = property("P1", 2, 0);
    h.admin.insert(stored.clone());
    h.client
        .insert(ClientPropertyData::from_property(&stored, Vec::new()));

    h.queue(h.admin_event("property_deleted", Some("P1"), json!({ "id": "P1" })));
    let results = h.service.process_pending_events().await;
    assert!(results[0].success, "{:?}", results[0].error);

    assert!(h.admin.get("P1").is_none());
    assert!(h.client.get("P1").is_none());
    assert_eq!(h.admin.deletes(), vec!["P1".to_string()]);
    assert_eq!(h.client.removals(), vec!["P1".to_string()]);
    assert!(h.service.cached_property("P1").is_none());
}

#[tokio::test]
async fn older_health_snapshot_does_not_replace_newer_one() {
    let h = Harness::new();
    for (overall, timestamp) in [(90.0, at(10)), (40.0, at(5))] {
        h.queue(h.admin_event(
            "system_health_updated",
            None,
            json!({ "overallHealth": overall, "timestamp": timestamp }),
        ));
    }

    let results = h.service.process_pending_events().await;
    assert!(results.iter().all(|r| r.success));

    let latest = h.service.latest_health().unwrap();
    assert_eq!(latest.overall_health, 90.0);
    assert_eq!(h.service.get_sync_statistics().latest_health_at, Some(at(10)));
}

#[tokio::test]
async fn foreign_user_is_rejected_and_audited() {
    let h = Harness::new();
    let mut rx = h.service.subscribe();
    let event = h.event(
        "property_created",
        Some("P1"),
        json!({ "name": "A", "version": 1 }),
    );
    let context = HandlerContext::new("someone-else", CLIENT, Some(AuthToken::new("token")));

    let result = h.service.process_event(event, context).await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().unwrap().code,
        ErrorCode::AuthorizationFailed
    );
    assert_eq!(h.audit.security_violations(), 1);
    assert_eq!(h.service.pending_events(), 0);
    assert!(h.admin.writes().is_empty());
    assert_eq!(drain(&mut rx)[0].topic, Topic::SyncError);
}

#[tokio::test]
async fn event_without_id_or_source_fails_validation() {
    let h = Harness::new();
    let event: guardsync::SyncEvent = serde_json::from_value(json!({
        "type": "property_deleted",
        "clientId": CLIENT,
        "userId": USER,
        "data": { "id": "P1" },
        "timestamp": h.clock.now(),
    }))
    .unwrap();
    let context = context_for(&event);

    let first = h.service.process_event(event.clone(), context.clone()).await;
    assert_eq!(first.error.as_ref().unwrap().code, ErrorCode::ValidationFailed);
    assert!(!first.is_retryable());

    // Nothing to recognise it by, so a second copy is validated again.
    let second = h.service.process_event(event, context).await;
    assert!(!second.replayed);
    assert_eq!(h.service.get_sync_statistics().events_failed, 2);
}

#[tokio::test]
async fn event_with_unrecognised_source_fails_validation() {
    let h = Harness::new();
    let mut event = h.event("property_deleted", Some("P1"), json!({ "id": "P1" }));
    event.source = None;

    let result = h.service.process_event(event.clone(), context_for(&event)).await;

    let error = result.error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::ValidationFailed);
    assert!(error.message.contains("source"));
}
