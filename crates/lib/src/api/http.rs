//! reqwest-backed data API clients.
//!
//! Both clients send JSON, attach the bearer credential from a
//! [`TokenSource`] to every call, and map `404` on reads to "absent".

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{AdminApi, ApiError, ApiResult, ClientApi, Side, TokenSource};
use crate::model::{ClientPropertyData, PropertySyncData};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared plumbing for both sides.
#[derive(Clone)]
struct ApiClient {
    side: Side,
    base: Url,
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    fn new(side: Side, base_url: &str, tokens: Arc<dyn TokenSource>) -> ApiResult<Self> {
        let trimmed = base_url.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ApiError::InvalidEndpoint(format!(
                "{side} endpoint must include http:// or https://"
            )));
        }
        let base = Url::parse(trimmed)
            .map_err(|e| ApiError::InvalidEndpoint(format!("{trimmed}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|source| ApiError::Http { side, source })?;

        Ok(Self {
            side,
            base,
            client,
            tokens,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> ApiResult<RequestBuilder> {
        let token = self
            .tokens
            .bearer_token()
            .ok_or(ApiError::MissingToken(self.side))?;
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        request.send().await.map_err(|source| ApiError::Http {
            side: self.side,
            source,
        })
    }

    async fn check(&self, response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            side: self.side,
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }

    async fn get_optional<T: for<'de> Deserialize<'de>>(&self, url: Url) -> ApiResult<Option<T>> {
        let response = self.send(self.request(Method::GET, url)?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(response).await?;
        let value = response.json::<T>().await.map_err(|source| ApiError::Http {
            side: self.side,
            source,
        })?;
        Ok(Some(value))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body)
        && let Some(message) = payload.message.or(payload.error)
    {
        return message.trim().to_string();
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}

/// Properties list endpoints answer either a bare array or `{"properties": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PropertyList {
    Bare(Vec<PropertySyncData>),
    Wrapped { properties: Vec<PropertySyncData> },
}

/// Admin console API over HTTP.
///
/// * `GET    {base}/api/sync/properties?limit=N`
/// * `GET    {base}/api/sync/properties/{id}`
/// * `PUT    {base}/api/sync/properties/{id}`
/// * `DELETE {base}/api/sync/properties/{id}`
#[derive(Clone)]
pub struct HttpAdminApi {
    inner: ApiClient,
}

impl HttpAdminApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> ApiResult<Self> {
        Ok(Self {
            inner: ApiClient::new(Side::Admin, base_url, tokens)?,
        })
    }
}

#[async_trait]
impl AdminApi for HttpAdminApi {
    async fn fetch_property(&self, id: &str) -> ApiResult<Option<PropertySyncData>> {
        let url = self.inner.endpoint(&["api", "sync", "properties", id])?;
        self.inner.get_optional(url).await
    }

    async fn fetch_all_properties(&self, limit: usize) -> ApiResult<Vec<PropertySyncData>> {
        let mut url = self.inner.endpoint(&["api", "sync", "properties"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        let list = self.inner.get_optional::<PropertyList>(url).await?;
        Ok(match list {
            Some(PropertyList::Bare(properties)) => properties,
            Some(PropertyList::Wrapped { properties }) => properties,
            None => Vec::new(),
        })
    }

    async fn write_property(&self, id: &str, data: &PropertySyncData) -> ApiResult<()> {
        let url = self.inner.endpoint(&["api", "sync", "properties", id])?;
        let request = self.inner.request(Method::PUT, url)?.json(data);
        let response = self.inner.send(request).await?;
        self.inner.check(response).await?;
        Ok(())
    }

    async fn delete_property(&self, id: &str) -> ApiResult<()> {
        let url = self.inner.endpoint(&["api", "sync", "properties", id])?;
        let response = self
            .inner
            .send(self.inner.request(Method::DELETE, url)?)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.inner.check(response).await?;
        Ok(())
    }
}

/// Client portal API over HTTP.
///
/// * `GET    {base}/api/sync/properties/{id}/images`
/// * `PUT    {base}/api/sync/properties/{id}/images`
/// * `DELETE {base}/api/sync/properties/{id}`
#[derive(Clone)]
pub struct HttpClientApi {
    inner: ApiClient,
}

impl HttpClientApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> ApiResult<Self> {
        Ok(Self {
            inner: ApiClient::new(Side::Client, base_url, tokens)?,
        })
    }
}

#[async_trait]
impl ClientApi for HttpClientApi {
    async fn fetch_property_images(&self, id: &str) -> ApiResult<Option<ClientPropertyData>> {
        let url = self
            .inner
            .endpoint(&["api", "sync", "properties", id, "images"])?;
        self.inner.get_optional(url).await
    }

    async fn write_property_images(&self, id: &str, data: &ClientPropertyData) -> ApiResult<()> {
        let url = self
            .inner
            .endpoint(&["api", "sync", "properties", id, "images"])?;
        let request = self.inner.request(Method::PUT, url)?.json(data);
        let response = self.inner.send(request).await?;
        self.inner.check(response).await?;
        Ok(())
    }

    async fn remove_property(&self, id: &str) -> ApiResult<()> {
        let url = self.inner.endpoint(&["api", "sync", "properties", id])?;
        let response = self
            .inner
            .send(self.inner.request(Method::DELETE, url)?)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.inner.check(response).await?;
        Ok(())
    }
}
