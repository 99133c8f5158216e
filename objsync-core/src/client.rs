use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry a path: {0}")]
    InvalidBaseUrl(String),
    #[error("object key is empty")]
    InvalidKey,
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Client for a JSON object-store API (`/storage/v1/b/{bucket}/o`).
///
/// Credentials are opaque: an optional bearer token is attached to every
/// request and never refreshed here.
#[derive(Clone)]
pub struct ObjectStoreClient {
    http: Client,
    base_url: Url,
    bucket: String,
    token: Option<String>,
    timeout: Duration,
}

impl ObjectStoreClient {
    pub fn with_base_url(
        base_url: &str,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: build_http(DEFAULT_REQUEST_TIMEOUT)?,
            base_url,
            bucket: bucket.into(),
            token: token.filter(|t| !t.is_empty()),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Replaces the request timeout. Listing and metadata calls must finish
    /// within it. Media downloads are bounded only while idle: connecting, or
    /// waiting for the next chunk, may not take longer than `timeout`, but a
    /// body that keeps arriving can stream for as long as it needs.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, StoreError> {
        self.http = build_http(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub async fn list_objects(
        &self,
        prefix: &str,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<ObjectList, StoreError> {
        let mut url = self.objects_endpoint(&[])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
            if let Some(max_results) = max_results {
                query.append_pair("maxResults", &max_results.to_string());
            }
        }
        let response = self
            .authorized(self.http.get(url).timeout(self.timeout))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Follows `nextPageToken` until the listing is exhausted. Order is the
    /// order the store returns, page after page.
    pub async fn list_objects_all(
        &self,
        prefix: &str,
        page_size: u32,
    ) -> Result<Vec<ObjectMeta>, StoreError> {
        let page_size = page_size.max(1);
        let mut page_token: Option<String> = None;
        let mut items = Vec::new();
        loop {
            let page = self
                .list_objects(prefix, page_token.as_deref(), Some(page_size))
                .await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(items)
    }

    pub async fn get_object_meta(&self, key: &str) -> Result<ObjectMeta, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let url = self.objects_endpoint(&[key])?;
        let response = self
            .authorized(self.http.get(url).timeout(self.timeout))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Starts a media download for `key`. The returned response has a
    /// success status; the caller streams the body.
    pub async fn open_object(&self, key: &str) -> Result<reqwest::Response, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let mut url = self.objects_endpoint(&[key])?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self.authorized(self.http.get(url)).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    fn objects_endpoint(&self, extra: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidBaseUrl(self.base_url.to_string()))?;
            // Keys may contain '/', each key is pushed as one encoded segment.
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", self.bucket.as_str(), "o"])
                .extend(extra);
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StoreError::Api { status, body }
    }
}

fn build_http(idle_timeout: Duration) -> Result<Client, StoreError> {
    Ok(Client::builder()
        .connect_timeout(idle_timeout)
        .read_timeout(idle_timeout)
        .build()?)
}

impl StoreError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            StoreError::Api { status, .. } => Some(classify_api_status(*status)),
            StoreError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    /// Decimal string on the wire.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub md5_hash: Option<String>,
}

impl ObjectMeta {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}

/// One listing page. The store omits `items` entirely when nothing matches
/// the prefix, which deserializes to an empty page.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    #[serde(default)]
    pub items: Vec<ObjectMeta>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}
