use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::error::SessionError;
use crate::metrics;
use crate::services::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.sessions.len().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "assessment-session",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": sessions,
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects `/metrics` with HTTP Basic auth against `METRICS_AUTH`
/// (`username:password`).
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());
    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub(crate) fn reject(err: SessionError) -> (StatusCode, String) {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!("Session request failed: {}", err);
    } else {
        tracing::debug!("Session request rejected: {}", err);
    }
    (status, err.to_string())
}

pub mod sessions;
pub mod sse;
