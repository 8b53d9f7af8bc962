use guardsync::{
    ErrorCode, Topic,
    handler::{Effect, EventHandler, SystemHealthHandler},
};
use serde_json::json;

use crate::helpers::{Harness, at, context_for};

#[tokio::test]
async fn health_snapshot_is_recorded_and_forwarded() {
    let h = Harness::new();
    let env = h.env();
    let event = h.admin_event(
        "system_health_updated",
        None,
        json!({
            "overallHealth": 92.5,
            "subsystems": [{ "name": "cameras", "health": 88.0 }],
            "timestamp": at(-5),
        }),
    );

    let result = SystemHealthHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    match &result.effects[..] {
        [Effect::RecordHealth { health }] => {
            assert_eq!(health.overall_health, 92.5);
            assert_eq!(health.timestamp, at(-5));
        }
        other => panic!("unexpected effects: {other:?}"),
    }
    let notification = &result.notifications[0];
    assert_eq!(notification.topic, Topic::SystemHealthUpdate);
    assert_eq!(notification.payload["kind"], "system_health_updated");
    assert_eq!(notification.payload["data"]["subsystems"][0]["name"], "cameras");
}

#[tokio::test]
async fn camera_status_is_forwarded_without_effects() {
    let h = Harness::new();
    let env = h.env();
    let event = h.event(
        "camera_status_changed",
        Some("P1"),
        json!({ "cameraId": "cam-3", "status": "offline" }),
    );

    let result = SystemHealthHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.effects.is_empty());
    assert_eq!(result.notifications[0].payload["propertyId"], "P1");
    assert_eq!(result.notifications[0].payload["data"]["status"], "offline");
}

#[tokio::test]
async fn out_of_range_values_are_rejected() {
    let h = Harness::new();
    let env = h.env();
    let cases = [
        (
            "system_health_updated",
            json!({ "overallHealth": 120.0, "timestamp": at(0) }),
        ),
        (
            "system_health_updated",
            json!({
                "overallHealth": 50.0,
                "subsystems": [{ "name": "ai", "health": -1.0 }],
                "timestamp": at(0),
            }),
        ),
        (
            "ai_detection_triggered",
            json!({ "cameraId": "cam-1", "detectionType": "person", "confidence": 1.5 }),
        ),
        (
            "camera_status_changed",
            json!({ "cameraId": " ", "status": "online" }),
        ),
    ];

    for (kind, data) in cases {
        let event = h.event(kind, None, data);
        let result = SystemHealthHandler
            .process_event(&event, &context_for(&event), &env)
            .await;
        assert!(!result.success, "{kind} should be rejected");
        assert_eq!(result.error.unwrap().code, ErrorCode::ValidationFailed);
    }
}
