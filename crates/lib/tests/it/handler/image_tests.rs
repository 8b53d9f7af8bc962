use guardsync::{
    ErrorCode, Topic,
    handler::{Effect, EventHandler, ImageHandler},
};
use serde_json::json;

use crate::helpers::{Harness, context_for, property};

fn images(count: usize) -> serde_json::Value {
    (0..count)
        .map(|i| {
            json!({
                "id": format!("img-{i}"),
                "url": format!("https://cdn.example/img-{i}.jpg"),
                "filename": format!("img-{i}.jpg"),
            })
        })
        .collect()
}

#[tokio::test]
async fn upload_counts_one_operation_per_image() {
    let h = Harness::new();
    h.admin.insert(property("P1", 1, 0));
    let env = h.env();
    let event = h.event("images_uploaded", Some("P1"), images(3));

    let result = ImageHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.performance_metrics.operation_count, 3);
    assert!(result.warnings.is_empty());
    match &result.effects[..] {
        [Effect::AttachImages { property_id, images }] => {
            assert_eq!(property_id, "P1");
            assert_eq!(images.len(), 3);
        }
        other => panic!("unexpected effects: {other:?}"),
    }

    let notification = &result.notifications[0];
    assert_eq!(notification.topic, Topic::ImagesSynced);
    assert_eq!(notification.action(), Some("uploaded"));
    assert_eq!(notification.payload["images"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn delete_lists_image_ids() {
    let h = Harness::new();
    h.admin.insert(property("P1", 1, 0));
    let env = h.env();
    let event = h.event("images_deleted", Some("P1"), json!(["img-0", "img-2"]));

    let result = ImageHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.performance_metrics.operation_count, 2);
    assert_eq!(
        result.effects,
        vec![Effect::DetachImages {
            property_id: "P1".to_string(),
            image_ids: vec!["img-0".to_string(), "img-2".to_string()],
        }]
    );
    assert_eq!(result.notifications[0].action(), Some("deleted"));
}

#[tokio::test]
async fn images_need_a_property_scope() {
    let h = Harness::new();
    let env = h.env();
    let event = h.event("images_uploaded", None, images(1));

    let result = ImageHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, ErrorCode::ValidationFailed);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let h = Harness::new();
    let env = h.env();
    let event = h.event("images_uploaded", Some("P1"), json!([]));

    let result = ImageHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, ErrorCode::ValidationFailed);
}

#[tokio::test]
async fn upload_for_unknown_property_warns() {
    let h = Harness::new();
    let env = h.env();
    let event = h.event("images_uploaded", Some("P404"), images(1));

    let result = ImageHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.warnings.len(), 1);
}

#[tokio::test]
async fn unreachable_admin_side_maps_to_image_sync_failure() {
    let h = Harness::new();
    h.admin.set_unavailable(true);
    let env = h.env();
    let event = h.event("images_uploaded", Some("P1"), images(2));

    let result = ImageHandler
        .process_event(&event, &context_for(&event), &env)
        .await;

    assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::ImageSyncFailed);
    assert!(result.is_retryable());
}
