//! Identity headers handed to the upstream.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use gateproxy_auth::ParsedIdentity;

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_TOKEN_PURPOSE: HeaderName = HeaderName::from_static("x-token-purpose");
pub const X_RAW_TOKEN: HeaderName = HeaderName::from_static("x-raw-token");

/// Removes identity headers supplied by the caller.
///
/// Only the gateway may assert identity; an inbound copy is never trusted.
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    for name in [X_USER_ID, X_TOKEN_PURPOSE, X_RAW_TOKEN] {
        headers.remove(name);
    }
}

/// Sets identity headers for a verified credential.
///
/// Claims that are absent, or not representable as header values, are left
/// unset.
pub fn inject_identity_headers(headers: &mut HeaderMap, identity: &ParsedIdentity, token: &str) {
    set_if_valid(headers, X_USER_ID, identity.subject.as_deref());
    set_if_valid(headers, X_TOKEN_PURPOSE, identity.purpose.as_deref());
    set_if_valid(headers, X_RAW_TOKEN, Some(token));
}

fn set_if_valid(headers: &mut HeaderMap, name: HeaderName, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "Claim not representable as a header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_removes_spoofed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(X_USER_ID, HeaderValue::from_static("admin"));
        headers.insert(X_TOKEN_PURPOSE, HeaderValue::from_static("access"));
        headers.insert(X_RAW_TOKEN, HeaderValue::from_static("forged"));
        headers.insert("x-other", HeaderValue::from_static("kept"));

        strip_identity_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-other"], "kept");
    }

    #[test]
    fn test_inject_sets_present_claims() {
        let mut headers = HeaderMap::new();
        let identity = ParsedIdentity {
            subject: Some("user-1".into()),
            audience: Some("gateway".into()),
            purpose: None,
        };

        inject_identity_headers(&mut headers, &identity, "tok");

        assert_eq!(headers[X_USER_ID], "user-1");
        assert_eq!(headers[X_RAW_TOKEN], "tok");
        assert!(headers.get(X_TOKEN_PURPOSE).is_none());
    }

    #[test]
    fn test_inject_skips_invalid_header_values() {
        let mut headers = HeaderMap::new();
        let identity = ParsedIdentity {
            subject: Some("line\nbreak".into()),
            ..Default::default()
        };

        inject_identity_headers(&mut headers, &identity, "tok");
        assert!(headers.get(X_USER_ID).is_none());
    }
}
