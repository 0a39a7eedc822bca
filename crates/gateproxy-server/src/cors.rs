//! CORS policy built from configuration.

use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

/// Returns whether `origin` matches one of the configured patterns.
///
/// Patterns are exact origins, `*` for any origin, or `*.example.com` for any
/// subdomain of `example.com`.
pub fn is_origin_allowed(origin: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|pattern| {
        if pattern == "*" || pattern == origin {
            return true;
        }
        match pattern.strip_prefix("*.") {
            Some(domain) => {
                origin_host(origin).is_some_and(|host| host.ends_with(&format!(".{domain}")))
            }
            None => false,
        }
    })
}

fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let host = rest.split(['/', ':']).next()?;
    (!host.is_empty()).then_some(host)
}

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let allowed = config.allowed_origins.clone();
    let layer = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| is_origin_allowed(origin, &allowed))
            },
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .max_age(config.max_age);

    if config.allow_credentials {
        layer.allow_credentials(true)
    } else {
        layer
    }
}
