//! Signing keys and the contract for retrieving them.

pub mod graphql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A public signing key published by the key authority.
///
/// Keys are immutable once fetched and identified by `id`, which tokens
/// reference through their `kid` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// Key identifier.
    pub id: String,
    /// PEM-encoded RSA public key.
    #[serde(rename = "body")]
    pub pem_body: String,
}

impl SigningKey {
    pub fn new(id: impl Into<String>, pem_body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pem_body: pem_body.into(),
        }
    }
}

/// Errors that can occur while fetching the key set.
#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    /// The request could not be sent or the response could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The authority returned a non-success status code.
    #[error("Key authority returned HTTP {0}")]
    Status(u16),

    /// The response body was not the expected JSON shape.
    #[error("Failed to decode key set: {0}")]
    Decode(String),

    /// The authority answered with GraphQL errors.
    #[error("Key authority reported errors: {0}")]
    GraphQl(String),

    /// The response carried neither data nor errors.
    #[error("Key authority returned no data")]
    EmptyResponse,

    /// The fetch did not complete within the configured deadline.
    #[error("Key fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<reqwest::Error> for KeyFetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Retrieves the complete current key set from an authority.
///
/// Implementations return every key the authority publishes; the caller
/// replaces its whole snapshot with the result.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>, KeyFetchError>;
}
