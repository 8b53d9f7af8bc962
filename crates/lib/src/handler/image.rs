use async_trait::async_trait;
use serde_json::json;

use super::{Effect, EventHandler, Execution, HandlerEnv, require_property};
use crate::{
    error::{ErrorCode, SyncError},
    event::{EventPayload, EventType, SyncEvent},
    notify::Topic,
};

/// Bulk image upload and delete. One operation per image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageHandler;

const SUPPORTED: &[EventType] = &[EventType::ImagesUploaded, EventType::ImagesDeleted];

#[async_trait]
impl EventHandler for ImageHandler {
    fn name(&self) -> &'static str {
        "image"
    }

    fn supported_types(&self) -> &'static [EventType] {
        SUPPORTED
    }

    fn validate_payload(&self, event: &SyncEvent) -> Result<(), SyncError> {
        require_property(event, "image")?;
        match &event.data {
            EventPayload::ImagesUploaded(images) => {
                if images.is_empty() {
                    return Err(SyncError::Validation("No images to upload".to_string()));
                }
                if let Some(bad) = images
                    .iter()
                    .find(|image| image.id.trim().is_empty() || image.url.trim().is_empty())
                {
                    return Err(SyncError::Validation(format!(
                        "Image descriptor {:?} needs both id and url",
                        bad.id
                    )));
                }
            }
            EventPayload::ImagesDeleted(ids) => {
                if ids.is_empty() {
                    return Err(SyncError::Validation("No images to delete".to_string()));
                }
                if ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(SyncError::Validation("Image ids must not be empty".to_string()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn execute(&self, event: &SyncEvent, env: &HandlerEnv) -> Result<Execution, SyncError> {
        let property_id = require_property(event, "image")?.to_string();

        let known = env
            .admin
            .fetch_property(&property_id)
            .await
            .map_err(|e| SyncError::processing(ErrorCode::ImageSyncFailed, e.to_string()))?
            .is_some();

        let (execution, action, payload) = match &event.data {
            EventPayload::ImagesUploaded(images) => (
                Execution::new(images.len()).with_effect(Effect::AttachImages {
                    property_id: property_id.clone(),
                    images: images.clone(),
                }),
                "uploaded",
                json!(images),
            ),
            EventPayload::ImagesDeleted(ids) => (
                Execution::new(ids.len()).with_effect(Effect::DetachImages {
                    property_id: property_id.clone(),
                    image_ids: ids.clone(),
                }),
                "deleted",
                json!(ids),
            ),
            _ => {
                return Err(SyncError::Validation(format!(
                    "Unexpected payload for {}",
                    event.kind
                )));
            }
        };

        let mut execution = execution.notify(
            Topic::ImagesSynced,
            json!({
                "action": action,
                "propertyId": property_id,
                "images": payload,
            }),
            env.now(),
        );
        if !known {
            execution = execution.warn(format!("Property {property_id} not found on admin side"));
        }
        Ok(execution)
    }
}
