use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{EventHandler, Execution, HandlerEnv};
use crate::{
    error::{ErrorCode, SyncError},
    event::{EventPayload, EventType, SyncEvent},
    model::{IncidentStatus, IncidentSyncData},
    notify::Topic,
};

/// Incident create/update/resolve.
///
/// A new incident at critical severity or above is announced on
/// [`Topic::EmergencyIncident`] straight away, before anything else in
/// `execute` can fail. The standard `incident-related` notification follows
/// once the service has finished with the event.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncidentHandler;

const SUPPORTED: &[EventType] = &[
    EventType::IncidentCreated,
    EventType::IncidentUpdated,
    EventType::IncidentResolved,
];

impl IncidentHandler {
    /// Fill in the fields the producer may leave out.
    fn normalize(event: &SyncEvent, kind: EventType, data: &IncidentSyncData) -> IncidentSyncData {
        let mut incident = data.clone();
        if incident.id.is_none() {
            incident.id = Some(event.id.clone());
        }
        if incident.property_id.is_none() {
            incident.property_id = event.property_id.clone();
        }
        incident.updated_at = Some(event.timestamp);
        match kind {
            EventType::IncidentCreated => {
                incident.created_at.get_or_insert(event.timestamp);
            }
            EventType::IncidentResolved => {
                incident.status = IncidentStatus::Resolved;
                incident.resolved_at.get_or_insert(event.timestamp);
            }
            _ => {}
        }
        incident
    }
}

#[async_trait]
impl EventHandler for IncidentHandler {
    fn name(&self) -> &'static str {
        "incident"
    }

    fn supported_types(&self) -> &'static [EventType] {
        SUPPORTED
    }

    fn validate_payload(&self, event: &SyncEvent) -> Result<(), SyncError> {
        let EventPayload::Incident(incident) = &event.data else {
            return Ok(());
        };
        if incident.property_id.is_none() && event.property_id.is_none() {
            return Err(SyncError::Validation(
                "propertyId is required for incident events".to_string(),
            ));
        }
        let creating = event.kind.known() == Some(EventType::IncidentCreated);
        if !creating && incident.id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            return Err(SyncError::Validation(format!(
                "Incident id is required for {}",
                event.kind
            )));
        }
        Ok(())
    }

    async fn execute(&self, event: &SyncEvent, env: &HandlerEnv) -> Result<Execution, SyncError> {
        let (Some(kind), EventPayload::Incident(data)) = (event.kind.known(), &event.data) else {
            return Err(SyncError::Validation(format!(
                "Unexpected payload for {}",
                event.kind
            )));
        };
        let incident = Self::normalize(event, kind, data);
        let property_id = incident.property_id.clone().unwrap_or_default();

        if kind == EventType::IncidentCreated
            && incident.severity.is_emergency()
            && env.alerts.first_alert(&event.id)
        {
            warn!(
                incident_id = incident.id.as_deref().unwrap_or_default(),
                property_id = %property_id,
                severity = %incident.severity,
                "emergency incident"
            );
            env.bus.emit(
                Topic::EmergencyIncident,
                json!({
                    "action": "emergency",
                    "propertyId": property_id,
                    "severity": incident.severity,
                    "incident": incident,
                }),
                env.now(),
            );
        }

        let known = env
            .admin
            .fetch_property(&property_id)
            .await
            .map_err(|e| SyncError::processing(ErrorCode::IncidentProcessingFailed, e.to_string()))?
            .is_some();

        let action = match kind {
            EventType::IncidentCreated => "created",
            EventType::IncidentResolved => "resolved",
            _ => "updated",
        };
        let mut execution = Execution::new(1).notify(
            Topic::IncidentRelated,
            json!({
                "action": action,
                "propertyId": property_id,
                "incident": incident,
            }),
            env.now(),
        );
        if !known {
            execution = execution.warn(format!("Property {property_id} not found on admin side"));
        }
        Ok(execution)
    }
}
