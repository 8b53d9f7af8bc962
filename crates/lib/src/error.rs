//! Error types for event processing and synchronization.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable error codes reported to callers and dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_FAILED")]
    ValidationFailed,
    #[serde(rename = "AUTHORIZATION_FAILED")]
    AuthorizationFailed,
    #[serde(rename = "UNSUPPORTED_EVENT_TYPE")]
    UnsupportedEventType,
    #[serde(rename = "PROPERTY_CREATION_FAILED")]
    PropertyCreationFailed,
    #[serde(rename = "PROPERTY_UPDATE_FAILED")]
    PropertyUpdateFailed,
    #[serde(rename = "PROPERTY_DELETION_FAILED")]
    PropertyDeletionFailed,
    #[serde(rename = "IMAGE_SYNC_FAILED")]
    ImageSyncFailed,
    #[serde(rename = "INCIDENT_PROCESSING_FAILED")]
    IncidentProcessingFailed,
    #[serde(rename = "SYSTEM_HEALTH_UPDATE_FAILED")]
    SystemHealthUpdateFailed,
    #[serde(rename = "EFFECT_APPLICATION_FAILED")]
    EffectApplicationFailed,
    #[serde(rename = "RETRIES_EXHAUSTED")]
    RetriesExhausted,
    #[serde(rename = "property_sync_error")]
    PropertySyncError,
    #[serde(rename = "full_sync_error")]
    FullSyncError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::AuthorizationFailed => "AUTHORIZATION_FAILED",
            ErrorCode::UnsupportedEventType => "UNSUPPORTED_EVENT_TYPE",
            ErrorCode::PropertyCreationFailed => "PROPERTY_CREATION_FAILED",
            ErrorCode::PropertyUpdateFailed => "PROPERTY_UPDATE_FAILED",
            ErrorCode::PropertyDeletionFailed => "PROPERTY_DELETION_FAILED",
            ErrorCode::ImageSyncFailed => "IMAGE_SYNC_FAILED",
            ErrorCode::IncidentProcessingFailed => "INCIDENT_PROCESSING_FAILED",
            ErrorCode::SystemHealthUpdateFailed => "SYSTEM_HEALTH_UPDATE_FAILED",
            ErrorCode::EffectApplicationFailed => "EFFECT_APPLICATION_FAILED",
            ErrorCode::RetriesExhausted => "RETRIES_EXHAUSTED",
            ErrorCode::PropertySyncError => "property_sync_error",
            ErrorCode::FullSyncError => "full_sync_error",
        }
    }

    /// Validation, authorization, unsupported types and exhausted budgets
    /// are terminal. Everything else may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorCode::ValidationFailed
                | ErrorCode::AuthorizationFailed
                | ErrorCode::UnsupportedEventType
                | ErrorCode::RetriesExhausted
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Structured failure attached to results and notifications.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub retryable: bool,
}

impl ErrorReport {
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Errors raised while processing a synchronization event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The event is malformed.
    #[error("Event validation failed: {0}")]
    Validation(String),

    /// The caller is not allowed to submit this event.
    #[error("Authorization failed: {0}")]
    Unauthorized(String),

    /// No handler is registered for the event type.
    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    /// A handler could not carry out the entity-specific work.
    #[error("{code}: {message}")]
    Processing { code: ErrorCode, message: String },

    /// Applying a handler's effects to either side failed.
    #[error("Failed to apply effects: {0}")]
    EffectApplication(String),

    /// The event used up its attempt budget.
    #[error("Giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// One property could not be reconciled.
    #[error("Failed to synchronize property {property_id}: {message}")]
    PropertySync {
        property_id: String,
        message: String,
    },

    /// A reconciliation cycle was aborted.
    #[error("Synchronization cycle failed: {0}")]
    Cycle(String),

    /// The background engine is not running.
    #[error("Synchronization service is not running")]
    NotRunning,

    /// The background engine was already started.
    #[error("Synchronization service is already running")]
    AlreadyRunning,

    /// The background engine stopped before answering.
    #[error("Failed to send command to background sync: {0}")]
    CommandSendError(String),
}

impl SyncError {
    pub fn processing(code: ErrorCode, message: impl Into<String>) -> Self {
        SyncError::Processing {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Validation(_) => ErrorCode::ValidationFailed,
            SyncError::Unauthorized(_) => ErrorCode::AuthorizationFailed,
            SyncError::UnsupportedEventType(_) => ErrorCode::UnsupportedEventType,
            SyncError::Processing { code, .. } => *code,
            SyncError::EffectApplication(_) => ErrorCode::EffectApplicationFailed,
            SyncError::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            SyncError::PropertySync { .. } => ErrorCode::PropertySyncError,
            SyncError::Cycle(_)
            | SyncError::NotRunning | SyncError::AlreadyRunning | SyncError::CommandSendError(_) => {
                ErrorCode::FullSyncError
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SyncError::Unauthorized(_)
            | SyncError::RetriesExhausted { .. }
            | SyncError::Cycle(_) => ErrorSeverity::High,
            SyncError::UnsupportedEventType(_) | SyncError::EffectApplication(_) => {
                ErrorSeverity::Medium
            }
            SyncError::Validation(_) => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Recoverable errors leave the service healthy; operator action is
    /// only needed for schema drift and security violations.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::Unauthorized(_) | SyncError::UnsupportedEventType(_)
        )
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            details: Value::Null,
            severity: self.severity(),
            recoverable: self.is_recoverable(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
