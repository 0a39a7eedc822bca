//! The per-request pipeline for proxied traffic.
//!
//! For every request that is not a gateway route:
//!
//! 1. Read the body and build outbound headers (spoofed identity headers removed)
//! 2. Extract and verify the bearer credential; inject identity on success
//! 3. Decide whether the response cache applies; serve a hit directly
//! 4. Forward to the upstream
//! 5. Store cacheable `200` responses
//!
//! Verification failures only suppress identity headers unless the failure
//! policy is closed. Cache failures only cost hits.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use gateproxy_auth::{ParsedIdentity, VerifyError};
use gateproxy_cache::{CacheEntry, CacheKey};
use http_body_util::LengthLimitError;

use crate::config::FailurePolicy;
use crate::credentials::extract_credential;
use crate::error::GatewayError;
use crate::identity::{inject_identity_headers, strip_identity_headers};
use crate::metrics::{self, CacheEvent};
use crate::proxy::{UpstreamResponse, is_hop_by_hop_header};
use crate::server::AppState;

pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");
pub const X_CACHE_AGE: HeaderName = HeaderName::from_static("x-cache-age");

/// Result of checking the request's credential.
#[derive(Debug)]
pub enum Verification {
    Absent,
    Rejected(VerifyError),
    Valid(ParsedIdentity),
}

impl Verification {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Rejected(e) => e.reason(),
            Self::Valid(_) => "valid",
        }
    }
}

/// What the cache does for this request.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheDecision {
    /// Cache disabled, or not a POST with a JSON/GraphQL body.
    NotApplicable,
    /// Eligible request the cache deliberately ignores.
    Skip(CacheEvent),
    Lookup(CacheKey),
}

pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.body_limit)
        .await
        .map_err(|e| body_read_error(&e, state.body_limit))?;
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let mut outbound = state.upstream.outbound_headers(&parts.headers, peer);
    strip_identity_headers(&mut outbound);

    let credential = extract_credential(
        &parts.headers,
        state.auth.credential_source,
        &state.auth.cookie_name,
    );
    let verification = verify(&state, credential.as_deref()).await;
    metrics::record_token_verification(verification.outcome());

    let verified_token = match (&verification, credential.as_deref()) {
        (Verification::Valid(identity), Some(token)) => {
            inject_identity_headers(&mut outbound, identity, token);
            Some(token)
        }
        (Verification::Rejected(e), _) if state.auth.failure_policy == FailurePolicy::Closed => {
            return Err(GatewayError::Unauthorized(e.to_string()));
        }
        (Verification::Absent, _) if state.auth.failure_policy == FailurePolicy::Closed => {
            return Err(GatewayError::Unauthorized("missing bearer credential".into()));
        }
        _ => None,
    };

    let decision = decide_caching(&state, &parts.method, &parts.headers, verified_token, &body);

    if let (CacheDecision::Lookup(key), Some(cache)) = (&decision, &state.cache) {
        let started = Instant::now();
        let hit = cache.get(key).await;
        metrics::record_cache_lookup(hit.is_some(), started.elapsed());

        if let Some(entry) = hit {
            metrics::record_cache_event(CacheEvent::Hit);
            tracing::debug!(cache_key = %key, "Cache hit - serving cached response");
            return Ok(cached_response(entry));
        }
        metrics::record_cache_event(CacheEvent::Miss);
        tracing::debug!(cache_key = %key, "Cache miss - forwarding request");
    }

    let upstream = state
        .upstream
        .forward(parts.method.clone(), &parts.uri, outbound, body)
        .await?;

    let cache_status = match (decision, &state.cache) {
        (CacheDecision::Lookup(key), Some(cache)) => {
            if upstream.status == StatusCode::OK {
                cache
                    .set(
                        &key,
                        upstream.body.to_vec(),
                        cacheable_headers(&upstream.headers),
                    )
                    .await;
                metrics::record_cache_event(CacheEvent::Set);
            } else {
                metrics::record_cache_event(CacheEvent::SkipStatus);
            }
            Some("MISS")
        }
        (CacheDecision::Skip(event), _) => {
            metrics::record_cache_event(event);
            Some("SKIP")
        }
        _ => None,
    };

    Ok(upstream_response(upstream, cache_status))
}

fn body_read_error(err: &axum::Error, limit: usize) -> GatewayError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return GatewayError::PayloadTooLarge(limit);
        }
        source = e.source();
    }
    GatewayError::BadRequest(format!("Failed to read request body: {err}"))
}

async fn verify(state: &AppState, credential: Option<&str>) -> Verification {
    let Some(token) = credential else {
        return Verification::Absent;
    };
    match state.verifier.verify(token).await {
        Ok(identity) => Verification::Valid(identity),
        Err(e) => {
            tracing::debug!(reason = e.reason(), error = %e, "Token verification failed");
            Verification::Rejected(e)
        }
    }
}

/// Decides how the response cache treats a request.
///
/// Only POSTs with a JSON or GraphQL body are considered. Those are skipped
/// without a verified credential, or when the classifier marks the payload as
/// a write.
pub fn decide_caching(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    verified_token: Option<&str>,
    body: &Bytes,
) -> CacheDecision {
    let Some(cache) = &state.cache else {
        return CacheDecision::NotApplicable;
    };
    if method != Method::POST || !is_graphql_content_type(headers) {
        return CacheDecision::NotApplicable;
    }
    let Some(token) = verified_token else {
        return CacheDecision::Skip(CacheEvent::SkipNoToken);
    };
    if !state.classifier.is_cacheable(body) {
        return CacheDecision::Skip(CacheEvent::SkipMutation);
    }
    CacheDecision::Lookup(cache.generate_key(token, body))
}

fn is_graphql_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("application/json") || ct.contains("application/graphql")
        })
}

/// Response headers worth replaying on a hit.
///
/// Framing, cookies and cache markers are recomputed or belong to a single
/// response.
fn cacheable_headers(headers: &HeaderMap) -> gateproxy_cache::HeaderMap {
    let mut out = gateproxy_cache::HeaderMap::new();
    for (name, value) in headers.iter() {
        if is_replay_excluded(name) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    out
}

fn is_replay_excluded(name: &HeaderName) -> bool {
    is_hop_by_hop_header(name.as_str())
        || name == header::CONTENT_LENGTH
        || name == header::SET_COOKIE
        || name == X_CACHE_STATUS
        || name == X_CACHE_AGE
}

fn cached_response(entry: CacheEntry) -> Response {
    let age = entry.age().as_secs();
    let mut response = Response::new(Body::from(entry.response));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    for (name, values) in &entry.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        if is_replay_excluded(&name) {
            continue;
        }
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers.insert(X_CACHE_STATUS, HeaderValue::from_static("HIT"));
    headers.insert(X_CACHE_AGE, HeaderValue::from(age));
    response
}

fn upstream_response(upstream: UpstreamResponse, cache_status: Option<&'static str>) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;

    let mut headers = upstream.headers;
    headers.remove(header::CONTENT_LENGTH);
    if let Some(status) = cache_status {
        headers.insert(X_CACHE_STATUS, HeaderValue::from_static(status));
    }
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphql_content_types() {
        let mut headers = HeaderMap::new();
        assert!(!is_graphql_content_type(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_graphql_content_type(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/graphql"));
        assert!(is_graphql_content_type(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_graphql_content_type(&headers));
    }

    #[test]
    fn test_cacheable_headers_drop_per_response_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(header::SET_COOKIE, HeaderValue::from_static("session=1"));
        headers.append("x-trace", HeaderValue::from_static("a"));
        headers.append("x-trace", HeaderValue::from_static("b"));

        let stored = cacheable_headers(&headers);

        assert_eq!(stored.len(), 2);
        assert_eq!(stored["content-type"], vec!["application/json"]);
        assert_eq!(stored["x-trace"], vec!["a", "b"]);
    }

    #[test]
    fn test_cached_response_marks_hit() {
        let mut stored = gateproxy_cache::HeaderMap::new();
        stored.insert("content-type".into(), vec!["application/json".into()]);
        let entry = CacheEntry::new(
            b"{\"data\":1}".to_vec(),
            stored,
            std::time::Duration::from_secs(60),
        );

        let response = cached_response(entry);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE_STATUS], "HIT");
        assert_eq!(response.headers()[X_CACHE_AGE], "0");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }
}
