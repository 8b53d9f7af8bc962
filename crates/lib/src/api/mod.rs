//! Contracts for the two data stores being synchronized.
//!
//! The admin console owns the relational property records; the client portal
//! owns a cache of property data plus uploaded images. The engine talks to
//! both through [`AdminApi`] and [`ClientApi`], so transport is pluggable:
//! [`http`] provides reqwest clients, [`memory`] provides in-process stores.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ClientPropertyData, PropertySyncData};

pub mod http;
pub mod memory;

pub use http::{HttpAdminApi, HttpClientApi};
pub use memory::{InMemoryAdminApi, InMemoryClientApi};

/// Which side of the synchronization an API call went to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Admin,
    Client,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Admin => f.write_str("admin"),
            Side::Client => f.write_str("client"),
        }
    }
}

/// Errors returned by data API calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// HTTP request failed before a response arrived.
    #[error("{side} API request failed: {source}")]
    Http {
        side: Side,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status.
    #[error("{side} API error: {message} ({status})")]
    Status {
        side: Side,
        status: u16,
        message: String,
    },

    /// The API cannot be reached at all.
    #[error("{side} API unavailable: {reason}")]
    Unavailable { side: Side, reason: String },

    /// Endpoint configuration is invalid.
    #[error("Invalid API endpoint: {0}")]
    InvalidEndpoint(String),

    /// No bearer credential could be obtained.
    #[error("No auth token available for {0} API")]
    MissingToken(Side),
}

impl ApiError {
    pub fn side(&self) -> Option<Side> {
        match self {
            ApiError::Http { side, .. }
            | ApiError::Status { side, .. }
            | ApiError::Unavailable { side, .. } => Some(*side),
            ApiError::MissingToken(side) => Some(*side),
            ApiError::InvalidEndpoint(_) => None,
        }
    }

    /// Network failures and server-side errors may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http { .. } | ApiError::Unavailable { .. } => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::InvalidEndpoint(_) | ApiError::MissingToken(_) => false,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<ApiError> for crate::Error {
    fn from(err: ApiError) -> Self {
        crate::Error::Api(err)
    }
}

/// Admin-side property store.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn fetch_property(&self, id: &str) -> ApiResult<Option<PropertySyncData>>;

    async fn fetch_all_properties(&self, limit: usize) -> ApiResult<Vec<PropertySyncData>>;

    async fn write_property(&self, id: &str, data: &PropertySyncData) -> ApiResult<()>;

    async fn delete_property(&self, id: &str) -> ApiResult<()>;
}

/// Client-side property cache and image store.
#[async_trait]
pub trait ClientApi: Send + Sync {
    async fn fetch_property_images(&self, id: &str) -> ApiResult<Option<ClientPropertyData>>;

    async fn write_property_images(&self, id: &str, data: &ClientPropertyData) -> ApiResult<()>;

    async fn remove_property(&self, id: &str) -> ApiResult<()>;
}

/// Supplies the bearer credential attached to outbound API calls.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed credential, e.g. a service token from configuration.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken").field(&"[REDACTED]").finish()
    }
}

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        let token = self.0.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}
