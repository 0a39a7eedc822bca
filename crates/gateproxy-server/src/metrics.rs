//! Prometheus metrics for the gateway.
//!
//! This module provides:
//! - HTTP request metrics (count, latency) split by proxied vs. gateway routes
//! - Response cache outcomes and lookup latency
//! - Token verification outcomes

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "gateproxy_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "gateproxy_http_request_duration_seconds";

    // Cache metrics
    pub const CACHE_EVENTS_TOTAL: &str = "gateproxy_cache_events_total";
    pub const CACHE_LOOKUP_DURATION_SECONDS: &str = "gateproxy_cache_lookup_duration_seconds";

    // Auth metrics
    pub const TOKEN_VERIFICATIONS_TOTAL: &str = "gateproxy_token_verifications_total";
}

/// Installs the Prometheus recorder as the global `metrics` recorder.
///
/// Returns `false` when a recorder is already installed, by this function or
/// anyone else. Metrics recorded before installation are lost.
pub fn init_metrics() -> bool {
    if PROMETHEUS.get().is_some() {
        return false;
    }

    // Pull-based: the gateway serves /_gateway/metrics itself
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            return false;
        }
    };

    let installed = PROMETHEUS.set(handle).is_ok();
    if installed {
        tracing::info!("Prometheus recorder installed");
    }
    installed
}

/// Prometheus text exposition, or `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}

// =============================================================================
// HTTP Metrics
// =============================================================================

/// Record an HTTP request. `route` is `proxy` or a gateway route name, never
/// the raw path.
pub fn record_http_request(method: &str, route: &'static str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route,
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Cache outcomes for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Hit,
    Miss,
    Set,
    SkipNoToken,
    SkipMutation,
    SkipStatus,
}

impl CacheEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Set => "set",
            Self::SkipNoToken => "skip_no_token",
            Self::SkipMutation => "skip_mutation",
            Self::SkipStatus => "skip_status",
        }
    }
}

pub fn record_cache_event(event: CacheEvent) {
    counter!(names::CACHE_EVENTS_TOTAL, "event" => event.as_str()).increment(1);
}

/// Record how long a cache lookup took and whether it hit.
pub fn record_cache_lookup(hit: bool, duration: Duration) {
    let result = if hit { "hit" } else { "miss" };
    histogram!(names::CACHE_LOOKUP_DURATION_SECONDS, "result" => result)
        .record(duration.as_secs_f64());
}

// =============================================================================
// Auth Metrics
// =============================================================================

/// Record a verification outcome: `valid`, `absent`, or a rejection reason.
pub fn record_token_verification(outcome: &'static str) {
    counter!(names::TOKEN_VERIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
}
