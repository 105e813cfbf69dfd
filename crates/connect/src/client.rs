//! HTTP client for the listing and enrichment endpoints.
//!
//! One client serves one listing (contacts or calls). Transport failures map
//! to the error variant of the operation that failed, non-2xx responses to
//! [`Error::Api`].

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use enrichsync_core::errors::{Error, Result};
use enrichsync_core::{EnrichmentApiClient, EntityId, EntityKind, ListQuery, ListResponse, StatusItem};

use crate::models::{
    ApiErrorResponse, ApiListResponse, ApiStatusResponse, ApiTriggerResponse, IdsRequest,
};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct HttpEnrichmentClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderValue,
    kind: EntityKind,
}

impl HttpEnrichmentClient {
    /// Create a client for the `kind` listing.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The API root (e.g., "https://crm.example.com")
    /// * `access_token` - Bearer token sent with every request
    /// * `kind` - Which listing the client serves
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the HTTP
    /// client cannot be initialized.
    pub fn new(base_url: &str, access_token: &str, kind: EntityKind) -> Result<Self> {
        Self::with_timeout(
            base_url,
            access_token,
            kind,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        access_token: &str,
        kind: EntityKind,
        timeout: Duration,
    ) -> Result<Self> {
        let auth_header = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| Error::InvalidConfigValue(format!("Invalid access token format: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Unexpected(format!("Failed to initialize HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            kind,
        })
    }

    /// Create default headers for API requests.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, self.auth_header.clone());
        headers
    }

    fn collection_url(&self) -> String {
        format!("{}/api/v1/{}", self.base_url, self.kind.collection())
    }

    /// Listing URL with paging, search and server-side filters.
    pub(crate) fn list_url(&self, query: &ListQuery) -> String {
        let mut params = vec![
            format!("page={}", query.page),
            format!("page_size={}", query.page_size),
        ];
        if let Some(search) = query.search.as_deref() {
            params.push(format!("search={}", urlencoding::encode(search)));
        }
        for (key, value) in &query.filters {
            params.push(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            ));
        }
        format!("{}?{}", self.collection_url(), params.join("&"))
    }

    pub(crate) fn trigger_url(&self) -> String {
        format!("{}/enrichment", self.collection_url())
    }

    pub(crate) fn status_url(&self) -> String {
        format!("{}/enrichment/status", self.collection_url())
    }

    /// Make a POST request with a JSON body and parse the response.
    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        transport_error: fn(String) -> Error,
    ) -> Result<T> {
        debug!("[EnrichmentApi] POST {}", url);

        let response = self
            .client
            .post(url)
            .headers(self.headers())
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(format!("Request failed: {}", e)))?;

        self.parse_response(response, transport_error).await
    }

    /// Parse an HTTP response, handling errors appropriately.
    async fn parse_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        transport_error: fn(String) -> Error,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            Error::Unexpected(format!(
                "Failed to parse response: {} - {}",
                e,
                body.chars().take(200).collect::<String>()
            ))
        })
    }
}

/// Map a non-2xx response to [`Error::Api`], preferring the body's message.
fn api_error(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .ok()
        .and_then(ApiErrorResponse::into_message)
        .unwrap_or_else(|| {
            let snippet: String = body.chars().take(200).collect();
            if snippet.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                snippet
            }
        });
    Error::api(status, message)
}

#[async_trait]
impl EnrichmentApiClient for HttpEnrichmentClient {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn list_entities(&self, query: &ListQuery) -> Result<ListResponse> {
        let url = self.list_url(query);
        debug!("[EnrichmentApi] GET {}", url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| Error::ListFetch(format!("Request failed: {}", e)))?;

        let listing: ApiListResponse = self.parse_response(response, Error::ListFetch).await?;
        Ok(listing.into_list_response(self.kind))
    }

    async fn start_enrichment(&self, ids: &[EntityId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let response: ApiTriggerResponse = self
            .post(&self.trigger_url(), &IdsRequest { ids }, Error::Trigger)
            .await?;

        if response.accepted.len() < ids.len() {
            info!(
                "[EnrichmentApi] Backend accepted {} of {} {} ids for enrichment",
                response.accepted.len(),
                ids.len(),
                self.kind
            );
        }
        Ok(())
    }

    async fn fetch_status(&self, ids: &[EntityId]) -> Result<Vec<StatusItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response: ApiStatusResponse = self
            .post(&self.status_url(), &IdsRequest { ids }, Error::StatusQuery)
            .await?;
        Ok(response.into_status_items(Utc::now()))
    }
}
