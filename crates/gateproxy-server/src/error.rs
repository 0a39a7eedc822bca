//! Errors that end a request with a gateway-generated response.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Upstream could not be reached or failed mid-response.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream did not answer within the configured timeout.
    #[error("Upstream timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    /// The request body could not be read.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request body exceeds `server.body_limit_bytes`.
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Credential missing or rejected under the closed failure policy.
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    /// The response cache is not configured.
    #[error("Response cache is disabled")]
    CacheDisabled,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::CacheDisabled => StatusCode::NOT_FOUND,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "upstream_unavailable",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Unauthorized(_) => "unauthorized",
            Self::CacheDisabled => "cache_disabled",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Gateway error");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let mut response = (
            status,
            Json(json!({ "error": self.code(), "message": self.to_string() })),
        )
            .into_response();

        if matches!(self, Self::Unauthorized(_)) {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Upstream("refused".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout(std::time::Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::Unauthorized("missing".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::PayloadTooLarge(1024).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = GatewayError::Unauthorized("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["www-authenticate"], "Bearer");
    }
}
