//!
//! Guardsync: the synchronization engine between the guard-dispatch admin
//! console and the client portal.
//!
//! Both front ends write property records, images, incidents and health
//! snapshots independently. This crate keeps the two sides consistent.
//!
//! ## Core Concepts
//!
//! * **Events (`event::SyncEvent`)**: One change on one side, with a typed payload. Processed once.
//! * **Handlers (`handler::EventHandler`)**: Validate, authorize, execute and audit one event family:
//!     * **Property (`handler::PropertyHandler`)**: Create/update/delete with version conflict detection.
//!     * **Image (`handler::ImageHandler`)**: Bulk image upload and delete.
//!     * **Incident (`handler::IncidentHandler`)**: Incident lifecycle, with an emergency fast path.
//!     * **System health (`handler::SystemHealthHandler`)**: Health, camera and detection pass-through.
//! * **Registry (`registry::HandlerRegistry`)**: Routes an event type to its handler.
//! * **Conflicts (`conflict::SyncConflict`)**: Two disagreeing snapshots and the rule that picks a winner.
//! * **Service (`service::SyncService`)**: Queue, retries, periodic reconciliation and notifications.
//! * **Data APIs (`api::AdminApi`, `api::ClientApi`)**: The two stores, over HTTP or in memory.

pub mod api;
pub mod audit;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod error;
pub mod event;
pub mod handler;
pub mod model;
pub mod notify;
pub mod registry;
pub mod service;

pub use api::{AdminApi, ApiError, ClientApi, InMemoryAdminApi, InMemoryClientApi, StaticToken};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use error::{ErrorCode, ErrorReport, SyncError};
pub use event::{AuthToken, EventPayload, EventSource, EventType, HandlerContext, SyncEvent};
pub use handler::EventHandlerResult;
pub use notify::{Notification, NotificationBus, Topic};
pub use registry::HandlerRegistry;
pub use service::{CycleOutcome, SyncService, SyncStatistics};

/// Result type used throughout the Guardsync library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Guardsync library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Event processing and service errors
    #[error(transparent)]
    Sync(error::SyncError),

    /// Admin or client data API errors
    #[error(transparent)]
    Api(api::ApiError),

    /// Configuration loading and validation errors
    #[error(transparent)]
    Config(config::ConfigError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Sync(_) => "sync",
            Error::Api(_) => "api",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_retryable(),
            Error::Api(api_err) => api_err.is_retryable(),
            Error::Io(_) => true,
            Error::Config(_) | Error::Serialize(_) => false,
        }
    }

    /// Check if this error is a malformed event or configuration.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_validation_error(),
            Error::Config(config::ConfigError::Invalid(_)) => true,
            _ => false,
        }
    }
}
