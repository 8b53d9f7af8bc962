use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{Effect, EventHandler, Execution, HandlerEnv};
use crate::{
    conflict::SyncConflict,
    error::{ErrorCode, SyncError},
    event::{EventPayload, EventSource, EventType, SyncEvent},
    model::PropertySyncData,
    notify::Topic,
};

/// Property create/update/delete.
///
/// Creates and updates are checked against the stored admin record: a
/// stored `version` strictly greater than the incoming one yields a
/// `version_conflict` (admin wins) and no write.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyHandler;

const SUPPORTED: &[EventType] = &[
    EventType::PropertyCreated,
    EventType::PropertyUpdated,
    EventType::PropertyDeleted,
];

impl PropertyHandler {
    async fn upsert(
        &self,
        event: &SyncEvent,
        incoming: &PropertySyncData,
        action: &str,
        failure: ErrorCode,
        env: &HandlerEnv,
    ) -> Result<Execution, SyncError> {
        let stored = env
            .admin
            .fetch_property(&incoming.id)
            .await
            .map_err(|e| SyncError::processing(failure, e.to_string()))?;

        if let Some(stored) = stored
            && stored.version > incoming.version
        {
            info!(
                property_id = %incoming.id,
                stored_version = stored.version,
                incoming_version = incoming.version,
                "stale property write, keeping stored version"
            );
            let source = event.source.unwrap_or(EventSource::Client);
            let conflict =
                SyncConflict::version_conflict(stored, incoming.clone(), source, env.now());
            return Ok(Execution::new(1).with_conflict(conflict));
        }

        Ok(Execution::new(1)
            .with_effect(Effect::UpsertProperty {
                property: incoming.clone(),
            })
            .notify(
                Topic::PropertySynced,
                json!({
                    "action": action,
                    "propertyId": incoming.id,
                    "source": event.source,
                    "data": incoming,
                }),
                env.now(),
            ))
    }

    async fn delete(
        &self,
        event: &SyncEvent,
        property_id: &str,
        env: &HandlerEnv,
    ) -> Result<Execution, SyncError> {
        let stored = env
            .admin
            .fetch_property(property_id)
            .await
            .map_err(|e| SyncError::processing(ErrorCode::PropertyDeletionFailed, e.to_string()))?;

        let mut execution = Execution::new(1)
            .with_effect(Effect::RemoveProperty {
                property_id: property_id.to_string(),
            })
            .notify(
                Topic::PropertySynced,
                json!({
                    "action": "deleted",
                    "propertyId": property_id,
                    "source": event.source,
                }),
                env.now(),
            );
        if stored.is_none() {
            execution = execution.warn(format!("Property {property_id} not found on admin side"));
        }
        Ok(execution)
    }
}

#[async_trait]
impl EventHandler for PropertyHandler {
    fn name(&self) -> &'static str {
        "property"
    }

    fn supported_types(&self) -> &'static [EventType] {
        SUPPORTED
    }

    fn validate_payload(&self, event: &SyncEvent) -> Result<(), SyncError> {
        let id = match &event.data {
            EventPayload::Property(property) => {
                if property.name.trim().is_empty() {
                    return Err(SyncError::Validation("Property name is required".to_string()));
                }
                &property.id
            }
            EventPayload::PropertyRemoval { property_id } => property_id,
            _ => return Ok(()),
        };
        if id.trim().is_empty() {
            return Err(SyncError::Validation("Property ID is required".to_string()));
        }
        if let Some(scope) = event.property_id.as_deref()
            && scope != id
        {
            return Err(SyncError::Validation(format!(
                "propertyId {scope} does not match payload id {id}"
            )));
        }
        Ok(())
    }

    async fn execute(&self, event: &SyncEvent, env: &HandlerEnv) -> Result<Execution, SyncError> {
        match (event.kind.known(), &event.data) {
            (Some(EventType::PropertyCreated), EventPayload::Property(property)) => {
                self.upsert(event, property, "created", ErrorCode::PropertyCreationFailed, env)
                    .await
            }
            (Some(EventType::PropertyUpdated), EventPayload::Property(property)) => {
                self.upsert(event, property, "updated", ErrorCode::PropertyUpdateFailed, env)
                    .await
            }
            (Some(EventType::PropertyDeleted), EventPayload::PropertyRemoval { property_id }) => {
                self.delete(event, property_id, env).await
            }
            _ => Err(SyncError::Validation(format!(
                "Unexpected payload for {}",
                event.kind
            ))),
        }
    }
}
