//! Gateway-owned routes under `/_gateway`.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;

use crate::error::GatewayError;
use crate::metrics;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
    version: &'a str,
}

pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not_found", "message": "Unknown gateway route" })),
    )
}

pub async fn metrics_text() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics not initialized\n".to_string(),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let Some(cache) = &state.cache else {
        return Json(CacheStatsResponse {
            enabled: false,
            backend: None,
            total: 0,
            expired: None,
            hits: 0,
            misses: 0,
            hit_rate: 0.0,
        });
    };

    let stats = cache.stats().await;
    Json(CacheStatsResponse {
        enabled: true,
        backend: Some(stats.backend),
        total: stats.total,
        expired: stats.expired,
        hits: stats.hits,
        misses: stats.misses,
        hit_rate: stats.hit_rate(),
    })
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub removed: usize,
}

pub async fn cache_clear(
    State(state): State<AppState>,
) -> Result<Json<CacheClearResponse>, GatewayError> {
    let cache = state.cache.as_ref().ok_or(GatewayError::CacheDisabled)?;
    let removed = cache.clear().await;
    Ok(Json(CacheClearResponse { removed }))
}
