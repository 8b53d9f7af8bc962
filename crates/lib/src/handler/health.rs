use async_trait::async_trait;
use serde_json::json;

use super::{Effect, EventHandler, Execution, HandlerEnv};
use crate::{
    error::SyncError,
    event::{EventPayload, EventType, SyncEvent},
    notify::Topic,
};

/// Health snapshots, camera status changes and AI detections.
///
/// Pass-through: the snapshot is republished on
/// [`Topic::SystemHealthUpdate`]. No version checks; the service keeps the
/// freshest health snapshot by timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHealthHandler;

const SUPPORTED: &[EventType] = &[
    EventType::SystemHealthUpdated,
    EventType::CameraStatusChanged,
    EventType::AiDetectionTriggered,
];

#[async_trait]
impl EventHandler for SystemHealthHandler {
    fn name(&self) -> &'static str {
        "system_health"
    }

    fn supported_types(&self) -> &'static [EventType] {
        SUPPORTED
    }

    fn validate_payload(&self, event: &SyncEvent) -> Result<(), SyncError> {
        match &event.data {
            EventPayload::SystemHealth(health) => {
                let in_range = |value: f64| value.is_finite() && (0.0..=100.0).contains(&value);
                if !in_range(health.overall_health) {
                    return Err(SyncError::Validation(format!(
                        "Overall health {} is outside 0-100",
                        health.overall_health
                    )));
                }
                if let Some(sub) = health.subsystems.iter().find(|s| !in_range(s.health)) {
                    return Err(SyncError::Validation(format!(
                        "Subsystem {} health {} is outside 0-100",
                        sub.name, sub.health
                    )));
                }
            }
            EventPayload::CameraStatus(camera) if camera.camera_id.trim().is_empty() => {
                return Err(SyncError::Validation("Camera id is required".to_string()));
            }
            EventPayload::AiDetection(detection) => {
                if detection.camera_id.trim().is_empty() {
                    return Err(SyncError::Validation("Camera id is required".to_string()));
                }
                if !(0.0..=1.0).contains(&detection.confidence) {
                    return Err(SyncError::Validation(format!(
                        "Detection confidence {} is outside 0-1",
                        detection.confidence
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn execute(&self, event: &SyncEvent, env: &HandlerEnv) -> Result<Execution, SyncError> {
        let mut execution = Execution::new(1);
        if let EventPayload::SystemHealth(health) = &event.data {
            execution = execution.with_effect(Effect::RecordHealth {
                health: health.clone(),
            });
        }
        Ok(execution.notify(
            Topic::SystemHealthUpdate,
            json!({
                "kind": event.kind,
                "propertyId": event.scoped_property(),
                "data": event.data.to_json(),
            }),
            env.now(),
        ))
    }
}
