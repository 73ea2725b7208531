//! REST client for the per-collection sync endpoints.
//!
//! Contract per collection: `GET {base}/{collection}?since=<ISO-8601>` lists
//! records updated at or after `since` (body is `{"data": [...]}` or a bare
//! array), `POST` upserts on the pre-assigned client id, `PATCH`/`DELETE`
//! address one record. All requests carry the session bearer token.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use ledgerbook_core::sync::{Collection, CollectionTransport, TransportError};

use crate::error::{ApiClientError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Standard error body shape returned by the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

/// Record listing body: `{"data": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordListBody {
    Wrapped { data: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

impl RecordListBody {
    fn into_records(self) -> Vec<serde_json::Value> {
        match self {
            RecordListBody::Wrapped { data } => data,
            RecordListBody::Bare(records) => records,
        }
    }
}

/// Client for the Ledgerbook collection sync API.
#[derive(Debug, Clone)]
pub struct CollectionApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CollectionApiClient {
    /// Create a new client for a base URL (e.g. "https://api.ledgerbook.app/api/v1/sync")
    /// and a session access token.
    pub fn new(base_url: &str, token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| ApiClientError::auth("Invalid session token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/{}", self.base_url, collection.table_name())
    }

    fn record_url(&self, collection: Collection, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            collection.table_name(),
            urlencoding::encode(id)
        )
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    fn error_from_body(status: reqwest::StatusCode, body: &str) -> ApiClientError {
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
            return ApiClientError::api(
                status.as_u16(),
                format!("{}: {}", error.code, error.message),
            );
        }
        ApiClientError::api(status.as_u16(), format!("Request failed: {}", body))
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::error_from_body(status, &body));
        }

        serde_json::from_str(&body).map_err(|err| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                err
            );
            ApiClientError::api(status.as_u16(), format!("Failed to parse response: {}", err))
        })
    }

    /// Check a response whose success body is irrelevant (and may be empty).
    async fn check_response(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if status.is_success() {
            return Ok(());
        }
        Err(Self::error_from_body(status, &body))
    }

    /// List records updated at or after `since` (all records when `None`).
    ///
    /// GET {base}/{collection}?since=<ISO-8601>
    pub async fn fetch_updated_since(
        &self,
        collection: Collection,
        since: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let url = self.collection_url(collection);
        debug!("Pulling '{}' since {:?}", collection, since);

        let mut request = self.client.get(&url).headers(self.headers()?);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        let response = request.send().await?;
        let body: RecordListBody = Self::parse_response(response).await?;
        Ok(body.into_records())
    }

    /// Create (or upsert, for a pre-assigned id) one record.
    ///
    /// POST {base}/{collection}
    pub async fn create_record(
        &self,
        collection: Collection,
        record: &serde_json::Value,
    ) -> Result<()> {
        let url = self.collection_url(collection);
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(record)
            .send()
            .await?;
        Self::check_response(response).await
    }

    /// Update one record.
    ///
    /// PATCH {base}/{collection}/{id}
    pub async fn update_record(
        &self,
        collection: Collection,
        id: &str,
        record: &serde_json::Value,
    ) -> Result<()> {
        let url = self.record_url(collection, id);
        let response = self
            .client
            .patch(&url)
            .headers(self.headers()?)
            .json(record)
            .send()
            .await?;
        Self::check_response(response).await
    }

    /// Delete one record. A 404 is reported as an `Api` error; the sync
    /// engine treats it as "already gone".
    ///
    /// DELETE {base}/{collection}/{id}
    pub async fn delete_record(&self, collection: Collection, id: &str) -> Result<()> {
        let url = self.record_url(collection, id);
        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        Self::check_response(response).await
    }
}

#[async_trait]
impl CollectionTransport for CollectionApiClient {
    async fn pull_since(
        &self,
        collection: Collection,
        since: Option<&str>,
    ) -> std::result::Result<Vec<serde_json::Value>, TransportError> {
        self.fetch_updated_since(collection, since)
            .await
            .map_err(TransportError::from)
    }

    async fn create(
        &self,
        collection: Collection,
        record: &serde_json::Value,
    ) -> std::result::Result<(), TransportError> {
        self.create_record(collection, record)
            .await
            .map_err(TransportError::from)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        record: &serde_json::Value,
    ) -> std::result::Result<(), TransportError> {
        self.update_record(collection, id, record)
            .await
            .map_err(TransportError::from)
    }

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
    ) -> std::result::Result<(), TransportError> {
        self.delete_record(collection, id)
            .await
            .map_err(TransportError::from)
    }
}
