//! Synchronization events.
//!
//! A [`SyncEvent`] is the unit of work: it is created by a producer, consumed
//! once by a handler, and never mutated afterwards. Its `data` is a
//! [`EventPayload`] whose variant is chosen by the event type, so handlers
//! receive strongly typed snapshots rather than an untyped blob.
//!
//! On the wire an event is a JSON object:
//!
//! ```json
//! {"id": "...", "type": "property_updated", "source": "client",
//!  "propertyId": "P1", "clientId": "C1", "userId": "U1",
//!  "data": {...}, "timestamp": "2024-01-01T00:00:00Z"}
//! ```

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::{
    AiDetectionData, CameraStatusData, ImageDescriptor, IncidentSyncData, PropertySyncData,
    SystemHealthSyncData,
};

/// Every event type a handler can be registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    PropertyCreated,
    PropertyUpdated,
    PropertyDeleted,
    ImagesUploaded,
    ImagesDeleted,
    IncidentCreated,
    IncidentUpdated,
    IncidentResolved,
    SystemHealthUpdated,
    CameraStatusChanged,
    AiDetectionTriggered,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::PropertyCreated,
        EventType::PropertyUpdated,
        EventType::PropertyDeleted,
        EventType::ImagesUploaded,
        EventType::ImagesDeleted,
        EventType::IncidentCreated,
        EventType::IncidentUpdated,
        EventType::IncidentResolved,
        EventType::SystemHealthUpdated,
        EventType::CameraStatusChanged,
        EventType::AiDetectionTriggered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PropertyCreated => "property_created",
            EventType::PropertyUpdated => "property_updated",
            EventType::PropertyDeleted => "property_deleted",
            EventType::ImagesUploaded => "images_uploaded",
            EventType::ImagesDeleted => "images_deleted",
            EventType::IncidentCreated => "incident_created",
            EventType::IncidentUpdated => "incident_updated",
            EventType::IncidentResolved => "incident_resolved",
            EventType::SystemHealthUpdated => "system_health_updated",
            EventType::CameraStatusChanged => "camera_status_changed",
            EventType::AiDetectionTriggered => "ai_detection_triggered",
        }
    }

    /// Types processed on the fast path instead of waiting for the next cycle.
    pub fn is_high_priority(self) -> bool {
        matches!(
            self,
            EventType::PropertyUpdated | EventType::ImagesUploaded
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

/// The declared type of an event as received.
///
/// Producers may send types no handler knows about; those are kept verbatim
/// so the registry can report them instead of dropping the event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Known(EventType),
    Unknown(String),
}

impl EventKind {
    pub fn known(&self) -> Option<EventType> {
        match self {
            EventKind::Known(kind) => Some(*kind),
            EventKind::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Known(kind) => kind.as_str(),
            EventKind::Unknown(name) => name,
        }
    }
}

impl From<EventType> for EventKind {
    fn from(kind: EventType) -> Self {
        EventKind::Known(kind)
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        match name.parse::<EventType>() {
            Ok(kind) => EventKind::Known(kind),
            Err(_) => EventKind::Unknown(name),
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        EventKind::from(name.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Known(kind) => kind.as_str().to_string(),
            EventKind::Unknown(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The system an event originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Admin,
    Client,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::Admin => "admin",
            EventSource::Client => "client",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event data, one variant per payload shape.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    /// `property_created` / `property_updated`
    Property(PropertySyncData),
    /// `property_deleted`
    PropertyRemoval { property_id: String },
    /// `images_uploaded`
    ImagesUploaded(Vec<ImageDescriptor>),
    /// `images_deleted`: image ids
    ImagesDeleted(Vec<String>),
    /// `incident_created` / `incident_updated` / `incident_resolved`
    Incident(IncidentSyncData),
    /// `system_health_updated`
    SystemHealth(SystemHealthSyncData),
    /// `camera_status_changed`
    CameraStatus(CameraStatusData),
    /// `ai_detection_triggered`
    AiDetection(AiDetectionData),
    /// Data that could not be matched to the declared type.
    Raw(Value),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemovalData {
    #[serde(alias = "propertyId")]
    id: String,
}

impl EventPayload {
    /// Parse `data` according to `kind`, keeping it raw when it does not fit.
    ///
    /// Property snapshots may omit `id` and `lastModified`; they default to
    /// the envelope's `propertyId` and `timestamp`.
    pub fn from_json(
        kind: &EventKind,
        mut data: Value,
        property_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let Some(kind) = kind.known() else {
            return EventPayload::Raw(data);
        };

        if matches!(kind, EventType::PropertyCreated | EventType::PropertyUpdated)
            && let Some(fields) = data.as_object_mut()
        {
            if let Some(id) = property_id {
                fields
                    .entry("id")
                    .or_insert_with(|| Value::String(id.to_string()));
            }
            fields
                .entry("lastModified")
                .or_insert_with(|| Value::String(timestamp.to_rfc3339()));
        }

        let parsed = match kind {
            EventType::PropertyCreated | EventType::PropertyUpdated => {
                serde_json::from_value(data.clone()).map(EventPayload::Property)
            }
            EventType::PropertyDeleted => serde_json::from_value::<RemovalData>(data.clone())
                .map(|removal| EventPayload::PropertyRemoval {
                    property_id: removal.id,
                }),
            EventType::ImagesUploaded => {
                serde_json::from_value(data.clone()).map(EventPayload::ImagesUploaded)
            }
            EventType::ImagesDeleted => {
                serde_json::from_value(data.clone()).map(EventPayload::ImagesDeleted)
            }
            EventType::IncidentCreated
            | EventType::IncidentUpdated
            | EventType::IncidentResolved => {
                serde_json::from_value(data.clone()).map(EventPayload::Incident)
            }
            EventType::SystemHealthUpdated => {
                serde_json::from_value(data.clone()).map(EventPayload::SystemHealth)
            }
            EventType::CameraStatusChanged => {
                serde_json::from_value(data.clone()).map(EventPayload::CameraStatus)
            }
            EventType::AiDetectionTriggered => {
                serde_json::from_value(data.clone()).map(EventPayload::AiDetection)
            }
        };

        parsed.unwrap_or(EventPayload::Raw(data))
    }

    /// JSON form of the payload.
    pub fn to_json(&self) -> Value {
        let value = match self {
            EventPayload::Property(data) => serde_json::to_value(data),
            EventPayload::PropertyRemoval { property_id } => {
                Ok(serde_json::json!({ "id": property_id }))
            }
            EventPayload::ImagesUploaded(images) => serde_json::to_value(images),
            EventPayload::ImagesDeleted(ids) => serde_json::to_value(ids),
            EventPayload::Incident(data) => serde_json::to_value(data),
            EventPayload::SystemHealth(data) => serde_json::to_value(data),
            EventPayload::CameraStatus(data) => serde_json::to_value(data),
            EventPayload::AiDetection(data) => serde_json::to_value(data),
            EventPayload::Raw(value) => return value.clone(),
        };
        value.unwrap_or(Value::Null)
    }

    /// Whether this payload shape belongs to `kind`.
    pub fn matches(&self, kind: EventType) -> bool {
        matches!(
            (self, kind),
            (
                EventPayload::Property(_),
                EventType::PropertyCreated | EventType::PropertyUpdated
            ) | (EventPayload::PropertyRemoval { .. }, EventType::PropertyDeleted)
                | (EventPayload::ImagesUploaded(_), EventType::ImagesUploaded)
                | (EventPayload::ImagesDeleted(_), EventType::ImagesDeleted)
                | (
                    EventPayload::Incident(_),
                    EventType::IncidentCreated
                        | EventType::IncidentUpdated
                        | EventType::IncidentResolved
                )
                | (EventPayload::SystemHealth(_), EventType::SystemHealthUpdated)
                | (EventPayload::CameraStatus(_), EventType::CameraStatusChanged)
                | (EventPayload::AiDetection(_), EventType::AiDetectionTriggered)
        )
    }

    /// Structured payloads are objects or arrays; `null` and scalars are not.
    pub fn is_structured(&self) -> bool {
        match self {
            EventPayload::Raw(value) => value.is_object() || value.is_array(),
            _ => true,
        }
    }

    /// Serialized size in bytes, reported in performance metrics.
    pub fn size_hint(&self) -> usize {
        serde_json::to_vec(&self.to_json()).map_or(0, |bytes| bytes.len())
    }
}

/// A synchronization event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireEvent", into = "WireEvent")]
pub struct SyncEvent {
    pub id: String,
    pub kind: EventKind,
    /// `None` when the producer sent no recognisable source; such events
    /// fail validation.
    pub source: Option<EventSource>,
    pub property_id: Option<String>,
    pub client_id: String,
    pub user_id: String,
    pub data: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    /// Create an event with a fresh id.
    pub fn new(
        kind: impl Into<EventKind>,
        source: EventSource,
        client_id: impl Into<String>,
        user_id: impl Into<String>,
        data: EventPayload,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            source: Some(source),
            property_id: None,
            client_id: client_id.into(),
            user_id: user_id.into(),
            data,
            timestamp,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_property(mut self, property_id: impl Into<String>) -> Self {
        self.property_id = Some(property_id.into());
        self
    }

    /// The property this event is scoped to, from the envelope or the payload.
    pub fn scoped_property(&self) -> Option<&str> {
        if let Some(id) = self.property_id.as_deref() {
            return Some(id);
        }
        match &self.data {
            EventPayload::Property(data) => Some(&data.id),
            EventPayload::PropertyRemoval { property_id } => Some(property_id),
            EventPayload::Incident(data) => data.property_id.as_deref(),
            EventPayload::CameraStatus(data) => data.property_id.as_deref(),
            EventPayload::AiDetection(data) => data.property_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(default, deserialize_with = "lenient_source")]
    source: Option<EventSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    property_id: Option<String>,
    client_id: String,
    user_id: String,
    #[serde(default)]
    data: Value,
    timestamp: DateTime<Utc>,
}

/// Missing, empty or unrecognised sources become `None` so validation can
/// report them against the event.
fn lenient_source<'de, D>(deserializer: D) -> Result<Option<EventSource>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|source| match source.trim() {
        "admin" => Some(EventSource::Admin),
        "client" => Some(EventSource::Client),
        _ => None,
    }))
}

impl From<WireEvent> for SyncEvent {
    fn from(wire: WireEvent) -> Self {
        let data = EventPayload::from_json(
            &wire.kind,
            wire.data,
            wire.property_id.as_deref(),
            wire.timestamp,
        );
        Self {
            id: wire.id,
            kind: wire.kind,
            source: wire.source,
            property_id: wire.property_id,
            client_id: wire.client_id,
            user_id: wire.user_id,
            data,
            timestamp: wire.timestamp,
        }
    }
}

impl From<SyncEvent> for WireEvent {
    fn from(event: SyncEvent) -> Self {
        Self {
            data: event.data.to_json(),
            id: event.id,
            kind: event.kind,
            source: event.source,
            property_id: event.property_id,
            client_id: event.client_id,
            user_id: event.user_id,
            timestamp: event.timestamp,
        }
    }
}

/// Bearer credential presented with an event.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    /// Expiry in milliseconds since the Unix epoch, if the issuer set one.
    #[serde(default)]
    pub expires_at_ms: Option<i64>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at_ms: None,
        }
    }

    pub fn expiring_at(mut self, expires_at_ms: i64) -> Self {
        self.expires_at_ms = Some(expires_at_ms);
        self
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        !self.token.trim().is_empty() && self.expires_at_ms.is_none_or(|exp| exp > now_ms)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"[REDACTED]")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// The authenticated session on whose behalf an event is processed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerContext {
    pub user_id: String,
    pub client_id: String,
    #[serde(default)]
    pub auth_token: Option<AuthToken>,
}

impl HandlerContext {
    pub fn new(
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        auth_token: Option<AuthToken>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            client_id: client_id.into(),
            auth_token,
        }
    }

    /// Context matching the event's own user and client.
    pub fn for_event(event: &SyncEvent, auth_token: AuthToken) -> Self {
        Self::new(
            event.user_id.clone(),
            event.client_id.clone(),
            Some(auth_token),
        )
    }
}
