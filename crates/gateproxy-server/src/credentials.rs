//! Bearer credential extraction.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;

use crate::config::CredentialSource;

/// Reads the bearer credential from `headers` according to `source`.
///
/// Empty values count as absent.
pub fn extract_credential(
    headers: &HeaderMap,
    source: CredentialSource,
    cookie_name: &str,
) -> Option<String> {
    match source {
        CredentialSource::Header => from_authorization(headers),
        CredentialSource::Cookie => from_cookie(headers, cookie_name),
        CredentialSource::Both => {
            from_authorization(headers).or_else(|| from_cookie(headers, cookie_name))
        }
    }
}

fn from_authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

fn from_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    let value = jar.get(cookie_name)?.value().trim();
    if value.is_empty() {
        return None;
    }
    tracing::debug!(cookie_name = %cookie_name, "Token extracted from cookie");
    Some(value.to_string())
}
