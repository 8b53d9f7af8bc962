use guardsync::{
    EventSource, Topic,
    conflict::{ConflictType, ResolvedBy},
    model::{ClientPropertyData, ImageDescriptor},
    service::ReconcileSummary,
};

use crate::helpers::{Harness, at, drain, property};

async fn reconcile(h: &Harness) -> ReconcileSummary {
    let outcome = h.service.perform_synchronization().await;
    let report = &outcome.reports()[0];
    assert!(report.is_success(), "{:?}", report.error);
    report.reconcile.clone().unwrap()
}

#[tokio::test]
async fn admin_only_property_is_mirrored_to_client() {
    let h = Harness::new();
    h.admin.insert(property("P1", 2, -100).with_address("4 Quay Ln"));

    let summary = reconcile(&h).await;

    assert_eq!(summary.mirrored, 1);
    let client = h.client.get("P1").unwrap();
    assert_eq!(client.version, 2);
    assert_eq!(client.address, "4 Quay Ln");
    assert_eq!(client.synced_at, Some(at(0)));
    assert!(h.admin.writes().is_empty());

    let summary = reconcile(&h).await;
    assert_eq!(summary.in_sync, 1);
    assert_eq!(summary.mirrored, 0);
}

#[tokio::test]
async fn newer_client_change_wins_by_timestamp() {
    let h = Harness::new();
    h.admin.insert(property("P1", 3, -100));
    reconcile(&h).await;

    let mut edited = h.client.get("P1").unwrap();
    edited.name = "Renamed on portal".to_string();
    edited.version = 4;
    edited.last_modified = at(-10);
    h.client.insert(edited);
    let mut rx = h.service.subscribe();

    let summary = reconcile(&h).await;

    assert_eq!(summary.conflicts_resolved, 1);
    let conflict = &summary.conflicts[0];
    assert_eq!(conflict.source, EventSource::Client);
    assert_eq!(conflict.conflict_type, ConflictType::VersionConflict);
    let resolution = conflict.resolution.as_ref().unwrap();
    assert_eq!(resolution.resolved_by, ResolvedBy::TimestampPriority);
    assert_eq!(resolution.winner, EventSource::Client);

    let admin = h.admin.get("P1").unwrap();
    assert_eq!(admin.name, "Renamed on portal");
    assert_eq!(admin.version, 4);
    assert_eq!(admin.resolved_by.as_deref(), Some("timestamp_priority"));

    let published = drain(&mut rx);
    assert!(
        published
            .iter()
            .any(|n| n.topic == Topic::PropertySynced && n.action() == Some("conflict_resolved"))
    );

    let summary = reconcile(&h).await;
    assert_eq!(summary.in_sync, 1);
    assert!(summary.conflicts.is_empty());
}

#[tokio::test]
async fn admin_change_wins_over_untouched_client() {
    let h = Harness::new();
    h.admin.insert(property("P1", 3, -100));
    reconcile(&h).await;

    let mut edited = h.admin.get("P1").unwrap();
    edited.address = "New gate on Elm St".to_string();
    edited.version = 4;
    edited.last_modified = at(-5);
    h.admin.insert(edited);

    let summary = reconcile(&h).await;

    let resolution = summary.conflicts[0].resolution.as_ref().unwrap();
    assert_eq!(resolution.resolved_by, ResolvedBy::AdminPriority);
    let client = h.client.get("P1").unwrap();
    assert_eq!(client.address, "New gate on Elm St");
    assert_eq!(client.version, 4);
}

#[tokio::test]
async fn divergence_without_history_favours_admin() {
    let h = Harness::new();
    h.admin.insert(property("P1", 2, -100));
    let mut client = ClientPropertyData::from_property(&property("P1", 2, -50), Vec::new());
    client.name = "Portal name".to_string();
    h.client.insert(client);

    let summary = reconcile(&h).await;

    let conflict = &summary.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::DataDivergence);
    assert_eq!(conflict.source, EventSource::Admin);
    assert_eq!(h.client.get("P1").unwrap().name, "Property P1");
}

#[tokio::test]
async fn client_images_survive_reconciliation() {
    let h = Harness::new();
    h.admin.insert(property("P1", 1, -100));
    let image = ImageDescriptor {
        id: "img-1".to_string(),
        url: "https://cdn.example/img-1.jpg".to_string(),
        filename: None,
        uploaded_at: Some(at(-20)),
        is_primary: true,
    };
    let mut client = ClientPropertyData::from_property(&property("P1", 1, -100), vec![image]);
    client.address = "Moved".to_string();
    client.last_modified = at(-10);
    h.client.insert(client);

    reconcile(&h).await;

    let admin = h.admin.get("P1").unwrap();
    assert_eq!(admin.images.image_count, 1);
    assert_eq!(
        admin.images.primary_image.as_deref(),
        Some("https://cdn.example/img-1.jpg")
    );
    assert_eq!(h.client.get("P1").unwrap().images.len(), 1);
}

#[tokio::test]
async fn one_failing_property_does_not_abort_the_pass() {
    let h = Harness::new();
    h.admin.insert(property("P1", 1, 0));
    h.admin.insert(property("P2", 1, 0));
    h.client.set_unavailable(true);

    let summary = reconcile(&h).await;

    assert_eq!(summary.properties_checked, 2);
    assert_eq!(summary.failed, vec!["P1".to_string(), "P2".to_string()]);
    assert_eq!(h.audit.errors().len(), 2);
    assert_eq!(h.service.get_sync_statistics().cycles_completed, 1);
}
