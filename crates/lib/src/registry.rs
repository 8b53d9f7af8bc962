//! Maps event types to the handler responsible for them.

use std::{collections::HashMap, sync::Arc};

use serde_json::json;
use tracing::warn;

use crate::{
    error::SyncError,
    event::{EventType, HandlerContext, SyncEvent},
    handler::{
        EventHandler, EventHandlerResult, HandlerEnv, ImageHandler, IncidentHandler,
        PerformanceMetrics, PropertyHandler, SystemHealthHandler,
    },
};

/// Event type to handler lookup.
///
/// Registering a handler claims every type it supports, replacing whatever
/// was registered for those types before.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the property, image, incident and system-health handlers.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PropertyHandler));
        registry.register(Arc::new(ImageHandler));
        registry.register(Arc::new(IncidentHandler));
        registry.register(Arc::new(SystemHealthHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        for kind in handler.supported_types() {
            self.handlers.insert(*kind, handler.clone());
        }
    }

    pub fn handler_for(&self, kind: EventType) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&kind)
    }

    /// Registered event types, in declaration order.
    pub fn supported_types(&self) -> Vec<EventType> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Route `event` to its handler.
    ///
    /// An event whose type has no handler yields a failed result with
    /// `UNSUPPORTED_EVENT_TYPE`, reported to the audit log.
    pub async fn dispatch(
        &self,
        event: &SyncEvent,
        context: &HandlerContext,
        env: &HandlerEnv,
    ) -> EventHandlerResult {
        if let Some(handler) = event.kind.known().and_then(|kind| self.handler_for(kind)) {
            return handler.process_event(event, context, env).await;
        }

        let error = SyncError::UnsupportedEventType(event.kind.to_string());
        warn!(event_id = %event.id, event_type = %event.kind, "no handler registered");
        let metrics = PerformanceMetrics {
            data_size: event.data.size_hint(),
            ..PerformanceMetrics::default()
        };
        let result = EventHandlerResult::failed(event, None, &error, metrics);
        env.audit
            .log_error(
                &error.report(),
                &json!({
                    "eventId": event.id,
                    "eventType": event.kind,
                    "source": event.source,
                }),
            )
            .await;
        result
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut handlers: Vec<_> = self
            .handlers
            .iter()
            .map(|(kind, handler)| (kind.as_str(), handler.name()))
            .collect();
        handlers.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &handlers)
            .finish()
    }
}
