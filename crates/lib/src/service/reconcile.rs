//! Writing resolved state back to both sides.
//!
//! Two entry points: [`apply_result`] carries out what a handler asked for
//! (conflict resolutions, then effects), and [`reconcile_all`] compares every
//! admin property with its client copy and repairs divergence.
//!
//! Images live on the client side; the admin record only carries a summary,
//! which is always recomputed from the client image list before writing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{State, SyncService};
use crate::{
    api::ApiError,
    conflict::{self, ResolutionStrategy, SyncConflict},
    error::SyncError,
    event::EventSource,
    handler::{Effect, EventHandlerResult},
    model::{ClientPropertyData, ImageDescriptor, ImageSummary, PropertySyncData},
    notify::{Notification, Topic},
};

/// What one reconciliation pass found.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub properties_checked: usize,
    pub in_sync: usize,
    /// Properties the client side did not have yet.
    pub mirrored: usize,
    pub conflicts_resolved: usize,
    pub conflicts: Vec<SyncConflict>,
    /// Properties that could not be reconciled this time.
    pub failed: Vec<String>,
}

enum PropertyOutcome {
    InSync,
    Mirrored,
    Resolved(SyncConflict),
}

fn effect_error(e: ApiError) -> SyncError {
    SyncError::EffectApplication(e.to_string())
}

fn remember(service: &SyncService, admin: Option<&PropertySyncData>, client: Option<&ClientPropertyData>) {
    let mut state = service.inner.state.lock().unwrap();
    if let Some(admin) = admin {
        state.admin_cache.insert(admin.id.clone(), admin.clone());
    }
    if let Some(client) = client {
        state
            .client_cache
            .insert(client.property_id.clone(), client.clone());
    }
}

fn forget(service: &SyncService, property_id: &str) {
    let mut state = service.inner.state.lock().unwrap();
    state.admin_cache.remove(property_id);
    state.client_cache.remove(property_id);
}

/// Write `data` to the admin side and mirror it, with `images`, to the client side.
async fn write_both(
    service: &SyncService,
    data: &PropertySyncData,
    images: Vec<ImageDescriptor>,
) -> Result<(), ApiError> {
    let env = service.env();
    env.admin.write_property(&data.id, data).await?;
    let client = ClientPropertyData::from_property(data, images);
    env.client.write_property_images(&data.id, &client).await?;
    remember(service, Some(data), Some(&client));
    Ok(())
}

async fn client_images(
    service: &SyncService,
    property_id: &str,
) -> Result<Option<Vec<ImageDescriptor>>, ApiError> {
    Ok(service
        .env()
        .client
        .fetch_property_images(property_id)
        .await?
        .map(|client| client.images))
}

/// Apply a successful handler result: resolve its conflicts, then its effects.
///
/// Resolution notifications are appended to the result's pending
/// notifications.
pub(super) async fn apply_result(
    service: &SyncService,
    result: &mut EventHandlerResult,
) -> Result<(), SyncError> {
    let now = service.now();

    for conflict in &mut result.conflicts {
        let Some(mut resolution) = conflict.resolve(now) else {
            continue;
        };
        let images = client_images(service, &conflict.property_id)
            .await
            .map_err(effect_error)?;
        if let Some(images) = &images {
            resolution.data.images = ImageSummary::from_images(images);
        }
        write_both(service, &resolution.data, images.unwrap_or_default())
            .await
            .map_err(effect_error)?;

        info!(
            property_id = %conflict.property_id,
            resolved_by = %resolution.resolved_by,
            version = resolution.data.version,
            "conflict resolved"
        );
        result.notifications.push(Notification::new(
            Topic::PropertySynced,
            json!({
                "action": "conflict_resolved",
                "propertyId": conflict.property_id,
                "conflictType": conflict.conflict_type,
                "winner": resolution.winner,
                "resolvedBy": resolution.resolved_by,
                "data": resolution.data,
            }),
            now,
        ));
        conflict.resolution = Some(resolution);
        service.inner.state.lock().unwrap().counters.conflicts_resolved += 1;
    }

    for effect in &result.effects {
        apply_effect(service, effect, now).await?;
    }
    Ok(())
}

async fn apply_effect(
    service: &SyncService,
    effect: &Effect,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let env = service.env();
    debug!(?effect, "applying effect");

    match effect {
        Effect::UpsertProperty { property } => {
            let images = client_images(service, &property.id)
                .await
                .map_err(effect_error)?;
            let mut data = property.clone();
            data.synced_at = Some(now);
            if let Some(images) = &images {
                data.images = ImageSummary::from_images(images);
            }
            write_both(service, &data, images.unwrap_or_default())
                .await
                .map_err(effect_error)?;
        }

        Effect::RemoveProperty { property_id } => {
            env.admin
                .delete_property(property_id)
                .await
                .map_err(effect_error)?;
            env.client
                .remove_property(property_id)
                .await
                .map_err(effect_error)?;
            forget(service, property_id);
        }

        Effect::AttachImages {
            property_id,
            images,
        } => {
            update_images(service, property_id, now, |current| {
                for image in images {
                    if image.is_primary {
                        current.iter_mut().for_each(|existing| existing.is_primary = false);
                    }
                    match current.iter_mut().find(|existing| existing.id == image.id) {
                        Some(existing) => *existing = image.clone(),
                        None => current.push(image.clone()),
                    }
                }
            })
            .await?;
        }

        Effect::DetachImages {
            property_id,
            image_ids,
        } => {
            update_images(service, property_id, now, |current| {
                current.retain(|image| !image_ids.contains(&image.id));
            })
            .await?;
        }

        Effect::RecordHealth { health } => {
            let mut state = service.inner.state.lock().unwrap();
            if state
                .latest_health
                .as_ref()
                .is_none_or(|latest| latest.timestamp <= health.timestamp)
            {
                state.latest_health = Some(health.clone());
            } else {
                debug!(timestamp = %health.timestamp, "ignoring older health snapshot");
            }
        }
    }
    Ok(())
}

/// Edit the client image list of a property and refresh the admin summary.
async fn update_images<F>(
    service: &SyncService,
    property_id: &str,
    now: DateTime<Utc>,
    edit: F,
) -> Result<(), SyncError>
where
    F: FnOnce(&mut Vec<ImageDescriptor>),
{
    let env = service.env();
    let admin = env
        .admin
        .fetch_property(property_id)
        .await
        .map_err(effect_error)?;
    let mut client = match env
        .client
        .fetch_property_images(property_id)
        .await
        .map_err(effect_error)?
    {
        Some(client) => client,
        None => match &admin {
            Some(admin) => ClientPropertyData::from_property(admin, Vec::new()),
            None => ClientPropertyData::empty(property_id, now),
        },
    };

    edit(&mut client.images);
    client.synced_at = Some(now);
    env.client
        .write_property_images(property_id, &client)
        .await
        .map_err(effect_error)?;

    let admin = match admin {
        Some(mut admin) => {
            admin.images = ImageSummary::from_images(&client.images);
            admin.synced_at = Some(now);
            env.admin
                .write_property(property_id, &admin)
                .await
                .map_err(effect_error)?;
            Some(admin)
        }
        None => None,
    };
    remember(service, admin.as_ref(), Some(&client));
    Ok(())
}

/// Which side changed since the last resolved mirror. Admin if both did.
fn infer_source(state: &State, admin: &PropertySyncData, client: &ClientPropertyData) -> EventSource {
    let admin_changed = state
        .admin_cache
        .get(&admin.id)
        .is_none_or(|mirror| !mirror.same_content(admin));
    let client_changed = state.client_cache.get(&admin.id).is_none_or(|mirror| {
        !PropertySyncData::from_client(mirror).same_content(&PropertySyncData::from_client(client))
    });

    if client_changed && !admin_changed {
        EventSource::Client
    } else {
        EventSource::Admin
    }
}

async fn sync_property(
    service: &SyncService,
    admin: PropertySyncData,
) -> Result<PropertyOutcome, SyncError> {
    let env = service.env();
    let property_id = admin.id.clone();
    let property_error = |e: ApiError| SyncError::PropertySync {
        property_id: property_id.clone(),
        message: e.to_string(),
    };
    let now = service.now();

    let Some(client) = env
        .client
        .fetch_property_images(&admin.id)
        .await
        .map_err(property_error)?
    else {
        let Some(resolution) = conflict::resolve(
            Some(&admin),
            None,
            EventSource::Admin,
            ResolutionStrategy::TimestampWins,
            now,
        ) else {
            return Ok(PropertyOutcome::InSync);
        };
        let mirrored = ClientPropertyData::from_property(&resolution.data, Vec::new());
        env.client
            .write_property_images(&admin.id, &mirrored)
            .await
            .map_err(property_error)?;
        remember(service, Some(&admin), Some(&mirrored));
        debug!(property_id = %admin.id, "mirrored property to client side");
        return Ok(PropertyOutcome::Mirrored);
    };

    let client_view = PropertySyncData::from_client(&client);
    if admin.same_content(&client_view) {
        remember(service, Some(&admin), Some(&client));
        return Ok(PropertyOutcome::InSync);
    }

    let source = {
        let state = service.inner.state.lock().unwrap();
        infer_source(&state, &admin, &client)
    };
    let Some(mut conflict) = SyncConflict::detect(&admin, &client_view, source, now) else {
        return Ok(PropertyOutcome::InSync);
    };
    let Some(mut resolution) = conflict.resolve(now) else {
        return Ok(PropertyOutcome::InSync);
    };
    resolution.data.images = ImageSummary::from_images(&client.images);
    write_both(service, &resolution.data, client.images.clone())
        .await
        .map_err(property_error)?;

    info!(
        property_id = %admin.id,
        source = %source,
        resolved_by = %resolution.resolved_by,
        "divergent property reconciled"
    );
    env.bus.emit(
        Topic::PropertySynced,
        json!({
            "action": "conflict_resolved",
            "propertyId": admin.id,
            "conflictType": conflict.conflict_type,
            "winner": resolution.winner,
            "resolvedBy": resolution.resolved_by,
            "data": resolution.data,
        }),
        now,
    );
    conflict.resolution = Some(resolution);
    service.inner.state.lock().unwrap().counters.conflicts_resolved += 1;
    Ok(PropertyOutcome::Resolved(conflict))
}

/// Compare every admin property with its client copy and repair divergence.
///
/// Failing to list admin properties aborts the pass. A failure on a single
/// property is logged and left for the next cycle.
pub(super) async fn reconcile_all(service: &SyncService) -> Result<ReconcileSummary, SyncError> {
    let env = service.env();
    let properties = env
        .admin
        .fetch_all_properties(service.config().property_fetch_limit)
        .await
        .map_err(|e| SyncError::Cycle(e.to_string()))?;

    let mut summary = ReconcileSummary {
        properties_checked: properties.len(),
        ..ReconcileSummary::default()
    };

    for admin in properties {
        let property_id = admin.id.clone();
        match sync_property(service, admin).await {
            Ok(PropertyOutcome::InSync) => summary.in_sync += 1,
            Ok(PropertyOutcome::Mirrored) => summary.mirrored += 1,
            Ok(PropertyOutcome::Resolved(conflict)) => {
                summary.conflicts_resolved += 1;
                summary.conflicts.push(conflict);
            }
            Err(e) => {
                warn!(property_id = %property_id, error = %e, "property reconciliation failed");
                env.audit
                    .log_error(&e.report(), &json!({ "propertyId": property_id }))
                    .await;
                summary.failed.push(property_id);
            }
        }
    }
    Ok(summary)
}
