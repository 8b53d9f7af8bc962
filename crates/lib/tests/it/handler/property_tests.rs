use guardsync::{
    ErrorCode, EventSource, Topic,
    conflict::{ConflictType, ResolutionStrategy},
    handler::{Effect, EventHandler, PropertyHandler},
};
use serde_json::json;

use crate::helpers::{Harness, context_for, property};

#[tokio::test]
async fn stale_update_reports_version_conflict_without_effects() {
    let h = Harness::new();
    h.admin.insert(property("P1", 5, -60));
    let env = h.env();
    let event = h.event(
        "property_updated",
        Some("P1"),
        json!({ "name": "Stale name", "version": 2 }),
    );

    let result = PropertyHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.handler.as_deref(), Some("property"));
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::VersionConflict);
    assert_eq!(conflict.resolution_strategy, ResolutionStrategy::AdminWins);
    assert_eq!(conflict.source, EventSource::Client);
    assert_eq!(conflict.admin_data.as_ref().unwrap().version, 5);
    assert_eq!(conflict.client_data.as_ref().unwrap().version, 2);
    assert!(result.effects.is_empty());
    assert!(result.notifications.is_empty());
    assert!(h.admin.writes().is_empty());
}

#[tokio::test]
async fn update_at_or_above_stored_version_is_upserted() {
    let h = Harness::new();
    h.admin.insert(property("P1", 3, -60));
    let env = h.env();

    for version in [3, 4] {
        let event = h.event(
            "property_updated",
            Some("P1"),
            json!({ "name": "Renamed", "version": version }),
        );
        let result = PropertyHandler
            .process_event(&event, &context_for(&event), &env)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.conflicts.is_empty());
        match &result.effects[..] {
            [Effect::UpsertProperty { property }] => {
                assert_eq!(property.version, version);
                assert_eq!(property.name, "Renamed");
                assert_eq!(property.last_modified, event.timestamp);
            }
            other => panic!("unexpected effects: {other:?}"),
        }
        assert_eq!(result.notifications.len(), 1);
        assert_eq!(result.notifications[0].topic, Topic::PropertySynced);
        assert_eq!(result.notifications[0].action(), Some("updated"));
    }
}

#[tokio::test]
async fn create_reports_operation_and_notification() {
    let h = Harness::new();
    let env = h.env();
    let event = h.event(
        "property_created",
        Some("P7"),
        json!({ "name": "Harbor Warehouse", "address": "1 Dock Rd", "version": 1 }),
    );

    let result = PropertyHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.performance_metrics.operation_count, 1);
    assert!(result.performance_metrics.data_size > 0);
    let notification = &result.notifications[0];
    assert_eq!(notification.action(), Some("created"));
    assert_eq!(notification.payload["propertyId"], "P7");
    assert_eq!(notification.payload["data"]["address"], "1 Dock Rd");
}

#[tokio::test]
async fn unreachable_admin_side_fails_with_retryable_code() {
    let h = Harness::new();
    h.admin.set_unavailable(true);
    let env = h.env();
    let event = h.event("property_created", Some("P1"), json!({ "name": "A", "version": 1 }));

    let result = PropertyHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(!result.success);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::PropertyCreationFailed);
    assert!(result.is_retryable());
}

#[tokio::test]
async fn payload_id_must_match_scoped_property() {
    let h = Harness::new();
    let env = h.env();
    let event = h.event(
        "property_updated",
        Some("P1"),
        json!({ "id": "P2", "name": "Other", "version": 1 }),
    );

    let result = PropertyHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::ValidationFailed);
    assert!(!result.is_retryable());
}

#[tokio::test]
async fn deleting_unknown_property_still_removes_with_warning() {
    let h = Harness::new();
    let env = h.env();
    let event = h.admin_event("property_deleted", Some("P9"), json!({ "id": "P9" }));

    let result = PropertyHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        result.effects,
        vec![Effect::RemoveProperty {
            property_id: "P9".to_string()
        }]
    );
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.notifications[0].action(), Some("deleted"));
}
