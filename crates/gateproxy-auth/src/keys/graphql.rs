//! Key fetcher backed by the authority's GraphQL endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{KeyFetchError, KeyFetcher, SigningKey};

const FETCH_ALL_KEYS: &str = "query FetchAllKeys { keys { id body } }";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<KeysData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct KeysData {
    #[serde(default)]
    keys: Vec<SigningKey>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Fetches signing keys with a single `FetchAllKeys` GraphQL query.
#[derive(Debug, Clone)]
pub struct GraphQlKeyFetcher {
    endpoint: Url,
    client: reqwest::Client,
}

impl GraphQlKeyFetcher {
    /// Creates a fetcher for `endpoint` with a per-request timeout.
    pub fn new(endpoint: Url, request_timeout: Duration) -> Result<Self, KeyFetchError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| KeyFetchError::Transport(e.to_string()))?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl KeyFetcher for GraphQlKeyFetcher {
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>, KeyFetchError> {
        tracing::debug!(endpoint = %self.endpoint, "Fetching signing keys");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "query": FETCH_ALL_KEYS }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyFetchError::Status(status.as_u16()));
        }

        let body: GraphQlResponse = response.json().await?;

        if !body.errors.is_empty() {
            let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(KeyFetchError::GraphQl(messages.join("; ")));
        }

        let data = body.data.ok_or(KeyFetchError::EmptyResponse)?;
        tracing::debug!(count = data.keys.len(), "Fetched signing keys");
        Ok(data.keys)
    }
}
