//! Event handlers.
//!
//! Every handler implements [`EventHandler`]: it names the event types it
//! supports and implements `execute`. The provided
//! [`EventHandler::process_event`] wraps `execute` in the shared pipeline:
//!
//! 1. audit start
//! 2. validate (envelope, declared type, payload shape, timestamp bounds,
//!    then [`EventHandler::validate_payload`])
//! 3. authorize against the [`HandlerContext`]
//! 4. execute
//! 5. audit completion, whatever step 2-4 returned
//!
//! Handlers never write to either side. They describe the writes they want
//! as [`Effect`]s and leave the notifications to publish in the
//! [`Execution`]; the service applies both after resolving conflicts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{
    api::{AdminApi, ClientApi},
    audit::AuditLogger,
    clock::Clock,
    conflict::SyncConflict,
    error::{ErrorReport, SyncError},
    event::{EventType, HandlerContext, SyncEvent},
    model::{ImageDescriptor, PropertySyncData, SystemHealthSyncData},
    notify::{AlertLedger, Notification, NotificationBus, Topic},
};

mod health;
mod image;
mod incident;
mod pipeline;
mod property;

pub use health::SystemHealthHandler;
pub use image::ImageHandler;
pub use incident::IncidentHandler;
pub use property::PropertyHandler;

/// Timestamp bounds applied during validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventLimits {
    /// Events further than this in the future are rejected.
    pub max_future_skew_secs: i64,
    /// Events older than this are processed with a warning.
    pub stale_event_age_secs: i64,
}

impl Default for EventLimits {
    fn default() -> Self {
        Self {
            max_future_skew_secs: 300,
            stale_event_age_secs: 3600,
        }
    }
}

/// Collaborators available to handlers while processing an event.
#[derive(Clone)]
pub struct HandlerEnv {
    pub admin: Arc<dyn AdminApi>,
    pub client: Arc<dyn ClientApi>,
    pub audit: Arc<dyn AuditLogger>,
    pub bus: NotificationBus,
    /// Emergency notifications already sent, by event id.
    pub alerts: AlertLedger,
    pub clock: Arc<dyn Clock>,
    pub limits: EventLimits,
}

impl HandlerEnv {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for HandlerEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEnv")
            .field("clock", &self.clock)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// A write requested by a handler, applied by the service.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    /// Write the snapshot to the admin side and mirror it to the client side.
    UpsertProperty { property: PropertySyncData },
    /// Remove the property from both sides.
    RemoveProperty { property_id: String },
    /// Add (or replace by id) images on the client side.
    AttachImages {
        property_id: String,
        images: Vec<ImageDescriptor>,
    },
    /// Remove images by id from the client side.
    DetachImages {
        property_id: String,
        image_ids: Vec<String>,
    },
    /// Keep the snapshot if it is the freshest seen.
    RecordHealth { health: SystemHealthSyncData },
}

impl Effect {
    pub fn property_id(&self) -> Option<&str> {
        match self {
            Effect::UpsertProperty { property } => Some(&property.id),
            Effect::RemoveProperty { property_id }
            | Effect::AttachImages { property_id, .. }
            | Effect::DetachImages { property_id, .. } => Some(property_id),
            Effect::RecordHealth { .. } => None,
        }
    }
}

/// What a handler's `execute` step produced.
#[derive(Clone, Debug, Default)]
pub struct Execution {
    pub operation_count: usize,
    pub conflicts: Vec<SyncConflict>,
    pub effects: Vec<Effect>,
    /// Notifications to publish once the effects have been applied.
    pub notifications: Vec<Notification>,
    pub warnings: Vec<String>,
}

impl Execution {
    pub fn new(operation_count: usize) -> Self {
        Self {
            operation_count,
            ..Self::default()
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_conflict(mut self, conflict: SyncConflict) -> Self {
        self.conflicts.push(conflict);
        self
    }

    pub fn notify(mut self, topic: Topic, payload: Value, timestamp: DateTime<Utc>) -> Self {
        self.notifications
            .push(Notification::new(topic, payload, timestamp));
        self
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub processing_time_ms: u64,
    pub data_size: usize,
    pub operation_count: usize,
}

/// Outcome of processing one event.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandlerResult {
    pub success: bool,
    pub event_id: String,
    pub event_type: String,
    /// Handler that processed the event; `None` when no handler matched.
    pub handler: Option<String>,
    pub conflicts: Vec<SyncConflict>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    pub performance_metrics: PerformanceMetrics,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when the result was recorded earlier and is being returned again.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl EventHandlerResult {
    pub fn succeeded(
        event: &SyncEvent,
        handler: &str,
        execution: Execution,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            success: true,
            event_id: event.id.clone(),
            event_type: event.kind.to_string(),
            handler: Some(handler.to_string()),
            conflicts: execution.conflicts,
            effects: execution.effects,
            notifications: execution.notifications,
            error: None,
            performance_metrics: metrics,
            warnings: execution.warnings,
            replayed: false,
        }
    }

    pub fn failed(
        event: &SyncEvent,
        handler: Option<&str>,
        error: &SyncError,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            success: false,
            event_id: event.id.clone(),
            event_type: event.kind.to_string(),
            handler: handler.map(str::to_string),
            conflicts: Vec::new(),
            effects: Vec::new(),
            notifications: Vec::new(),
            error: Some(error.report()),
            performance_metrics: metrics,
            warnings: Vec::new(),
            replayed: false,
        }
    }

    /// Whether a failed result may succeed if the event is processed again.
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|error| error.retryable)
    }
}

/// A handler for one family of synchronization events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Event types this handler accepts. Each type maps to one handler.
    fn supported_types(&self) -> &'static [EventType];

    fn supports(&self, kind: EventType) -> bool {
        self.supported_types().contains(&kind)
    }

    /// Handler-specific payload checks, run at the end of validation.
    fn validate_payload(&self, _event: &SyncEvent) -> Result<(), SyncError> {
        Ok(())
    }

    /// Type-specific work. Called only for validated, authorized events.
    async fn execute(&self, event: &SyncEvent, env: &HandlerEnv) -> Result<Execution, SyncError>;

    /// Run the full pipeline for `event` on behalf of `context`.
    async fn process_event(
        &self,
        event: &SyncEvent,
        context: &HandlerContext,
        env: &HandlerEnv,
    ) -> EventHandlerResult {
        pipeline::process(self, event, context, env).await
    }
}

/// The `propertyId` scoping an event, or a validation error naming `what`.
pub(crate) fn require_property<'a>(event: &'a SyncEvent, what: &str) -> Result<&'a str, SyncError> {
    match event.scoped_property() {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(SyncError::Validation(format!(
            "propertyId is required for {what} events"
        ))),
    }
}
