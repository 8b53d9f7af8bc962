use std::time::Instant;

use serde_json::json;
use tracing::{Instrument, debug, info_span, warn};

use super::{EventHandler, EventHandlerResult, HandlerEnv, PerformanceMetrics};
use crate::{
    audit::{AuditCategory, AuditOutcome, AuditRecord, SecurityContext},
    error::{ErrorSeverity, SyncError},
    event::{EventKind, HandlerContext, SyncEvent},
};

const ACTION: &str = "process_sync_event";

pub(super) async fn process<H>(
    handler: &H,
    event: &SyncEvent,
    context: &HandlerContext,
    env: &HandlerEnv,
) -> EventHandlerResult
where
    H: EventHandler + ?Sized,
{
    let span = info_span!(
        "process_event",
        handler = handler.name(),
        event_id = %event.id,
        event_type = %event.kind,
    );

    async move {
        let started = Instant::now();
        let data_size = event.data.size_hint();

        env.audit
            .log_event(audit_record(event, env, AuditOutcome::Started, None, data_size))
            .await;

        let mut warnings = Vec::new();
        let outcome = match validate(handler, event, env, &mut warnings) {
            Ok(()) => match authorize(event, context, env).await {
                Ok(()) => handler.execute(event, env).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (audit_outcome, operation_count) = match &outcome {
            Ok(execution) => (AuditOutcome::Success, execution.operation_count),
            Err(_) => (AuditOutcome::Failure, 0),
        };
        env.audit
            .log_event(audit_record(
                event,
                env,
                audit_outcome,
                Some(elapsed_ms),
                data_size,
            ))
            .await;

        let metrics = PerformanceMetrics {
            processing_time_ms: elapsed_ms,
            data_size,
            operation_count,
        };

        match outcome {
            Ok(execution) => {
                debug!(
                    operations = operation_count,
                    conflicts = execution.conflicts.len(),
                    elapsed_ms,
                    "event processed"
                );
                let mut result =
                    EventHandlerResult::succeeded(event, handler.name(), execution, metrics);
                warnings.append(&mut result.warnings);
                result.warnings = warnings;
                result
            }
            Err(e) => {
                warn!(error = %e, code = %e.code(), "event processing failed");
                let mut result =
                    EventHandlerResult::failed(event, Some(handler.name()), &e, metrics);
                result.warnings = warnings;
                result
            }
        }
    }
    .instrument(span)
    .await
}

fn validate<H>(
    handler: &H,
    event: &SyncEvent,
    env: &HandlerEnv,
    warnings: &mut Vec<String>,
) -> Result<(), SyncError>
where
    H: EventHandler + ?Sized,
{
    if event.id.trim().is_empty() {
        return Err(SyncError::Validation("Event ID is required".to_string()));
    }
    if event.source.is_none() {
        return Err(SyncError::Validation("Event source is required".to_string()));
    }

    let kind = match &event.kind {
        EventKind::Known(kind) => *kind,
        EventKind::Unknown(name) if name.trim().is_empty() => {
            return Err(SyncError::Validation("Event type is required".to_string()));
        }
        EventKind::Unknown(name) => {
            return Err(SyncError::Validation(format!(
                "Event type {name} is not supported by {}",
                handler.name()
            )));
        }
    };
    if !handler.supports(kind) {
        return Err(SyncError::Validation(format!(
            "Event type {kind} is not supported by {}",
            handler.name()
        )));
    }

    if !event.data.is_structured() {
        return Err(SyncError::Validation(
            "Event data must be a structured payload".to_string(),
        ));
    }
    if !event.data.matches(kind) {
        return Err(SyncError::Validation(format!(
            "Event data does not match the {kind} payload"
        )));
    }

    let now_ms = env.clock.now_millis();
    let event_ms = event.timestamp.timestamp_millis();
    if event_ms - now_ms > env.limits.max_future_skew_secs.saturating_mul(1000) {
        return Err(SyncError::Validation(
            "Event timestamp is too far in the future".to_string(),
        ));
    }
    if now_ms - event_ms > env.limits.stale_event_age_secs.saturating_mul(1000) {
        let age_secs = (now_ms - event_ms) / 1000;
        warn!(age_secs, "processing stale event");
        warnings.push(format!("Event is {age_secs}s old"));
    }

    handler.validate_payload(event)
}

async fn authorize(
    event: &SyncEvent,
    context: &HandlerContext,
    env: &HandlerEnv,
) -> Result<(), SyncError> {
    let violation = if context.user_id != event.user_id {
        Some("User ID mismatch between context and event")
    } else if context.client_id != event.client_id {
        Some("Client ID mismatch between context and event")
    } else if !context
        .auth_token
        .as_ref()
        .is_some_and(|token| token.is_valid_at(env.clock.now_millis()))
    {
        Some("Missing or expired auth token")
    } else {
        None
    };

    let Some(description) = violation else {
        return Ok(());
    };

    let security = SecurityContext {
        event_id: event.id.clone(),
        event_user_id: event.user_id.clone(),
        event_client_id: event.client_id.clone(),
        context_user_id: context.user_id.clone(),
        context_client_id: context.client_id.clone(),
        token_present: context.auth_token.is_some(),
    };
    env.audit
        .log_security_violation(description, &security, ErrorSeverity::High)
        .await;

    Err(SyncError::Unauthorized(description.to_string()))
}

fn audit_record(
    event: &SyncEvent,
    env: &HandlerEnv,
    outcome: AuditOutcome,
    processing_time_ms: Option<u64>,
    data_size: usize,
) -> AuditRecord {
    AuditRecord {
        action: ACTION.to_string(),
        category: AuditCategory::DataModification,
        outcome,
        event_id: event.id.clone(),
        event_type: event.kind.to_string(),
        actor: event.user_id.clone(),
        client_id: event.client_id.clone(),
        processing_time_ms,
        data_size: processing_time_ms.map(|_| data_size),
        timestamp: env.now(),
        details: json!({
            "source": event.source,
            "propertyId": event.property_id,
        }),
    }
}
