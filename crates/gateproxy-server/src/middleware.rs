use std::time::Instant;

use axum::{body::Body, extract::Request, middleware::Next, response::Response};

use crate::metrics;

pub const GATEWAY_PREFIX: &str = "/_gateway";

// Records request count and latency. Proxied paths are collapsed into one
// label so upstream paths never become metric labels.
pub async fn http_metrics(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let route = route_label(req.uri().path());

    let res = next.run(req).await;

    metrics::record_http_request(
        method.as_str(),
        route,
        res.status().as_u16(),
        started.elapsed(),
    );
    res
}

fn route_label(path: &str) -> &'static str {
    match path.strip_prefix(GATEWAY_PREFIX) {
        Some("/healthz") => "healthz",
        Some("/metrics") => "metrics",
        Some(rest) if rest.starts_with("/cache") => "cache_admin",
        _ => "proxy",
    }
}
