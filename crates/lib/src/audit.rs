//! Audit logging for processed events.
//!
//! The audit trail is an external collaborator; the engine only depends on
//! the [`AuditLogger`] trait. [`TracingAuditLogger`] writes structured
//! records through `tracing`, and [`MemoryAuditLogger`] keeps them for
//! inspection.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorReport, ErrorSeverity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    DataModification,
    Security,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Started,
    Success,
    Failure,
}

/// One audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub action: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub event_id: String,
    pub event_type: String,
    /// User on whose behalf the event was processed.
    pub actor: String,
    pub client_id: String,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
    #[serde(default)]
    pub data_size: Option<usize>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Value,
}

/// Security-relevant facts recorded with a violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub event_id: String,
    pub event_user_id: String,
    pub event_client_id: String,
    pub context_user_id: String,
    pub context_client_id: String,
    pub token_present: bool,
}

/// Sink for audit records.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log_event(&self, record: AuditRecord);

    async fn log_security_violation(
        &self,
        description: &str,
        context: &SecurityContext,
        severity: ErrorSeverity,
    );

    async fn log_error(&self, error: &ErrorReport, context: &Value);
}

/// Audit logger that emits records on the `guardsync::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log_event(&self, record: AuditRecord) {
        tracing::info!(
            target: "guardsync::audit",
            action = %record.action,
            outcome = ?record.outcome,
            event_id = %record.event_id,
            event_type = %record.event_type,
            actor = %record.actor,
            client_id = %record.client_id,
            processing_time_ms = record.processing_time_ms,
            data_size = record.data_size,
            "audit"
        );
    }

    async fn log_security_violation(
        &self,
        description: &str,
        context: &SecurityContext,
        severity: ErrorSeverity,
    ) {
        if severity >= ErrorSeverity::High {
            tracing::error!(
                target: "guardsync::audit",
                event_id = %context.event_id,
                event_user = %context.event_user_id,
                context_user = %context.context_user_id,
                severity = ?severity,
                "security violation: {description}"
            );
        } else {
            tracing::warn!(
                target: "guardsync::audit",
                event_id = %context.event_id,
                severity = ?severity,
                "security violation: {description}"
            );
        }
    }

    async fn log_error(&self, error: &ErrorReport, context: &Value) {
        tracing::error!(
            target: "guardsync::audit",
            code = %error.code,
            retryable = error.retryable,
            context = %context,
            "{}",
            error.message
        );
    }
}

/// Entry captured by [`MemoryAuditLogger`].
#[derive(Clone, Debug, PartialEq)]
pub enum AuditEntry {
    Event(AuditRecord),
    SecurityViolation {
        description: String,
        context: SecurityContext,
        severity: ErrorSeverity,
    },
    Error {
        report: ErrorReport,
        context: Value,
    },
}

/// Audit logger that keeps every entry in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<AuditRecord> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| match entry {
                AuditEntry::Event(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn security_violations(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| matches!(entry, AuditEntry::SecurityViolation { .. }))
            .count()
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| match entry {
                AuditEntry::Error { report, .. } => Some(report.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log_event(&self, record: AuditRecord) {
        self.entries.lock().unwrap().push(AuditEntry::Event(record));
    }

    async fn log_security_violation(
        &self,
        description: &str,
        context: &SecurityContext,
        severity: ErrorSeverity,
    ) {
        self.entries
            .lock()
            .unwrap()
            .push(AuditEntry::SecurityViolation {
                description: description.to_string(),
                context: context.clone(),
                severity,
            });
    }

    async fn log_error(&self, error: &ErrorReport, context: &Value) {
        self.entries.lock().unwrap().push(AuditEntry::Error {
            report: error.clone(),
            context: context.clone(),
        });
    }
}
