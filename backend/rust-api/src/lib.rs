use std::sync::Arc;

use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::SessionError;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-trace-id")])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1/sessions", sessions_routes().layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::sessions::create_session))
        .route(
            "/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::cancel_session),
        )
        .route("/{id}/navigate", post(handlers::sessions::navigate))
        .route("/{id}/answers", post(handlers::sessions::capture_answer))
        .route("/{id}/finish", post(handlers::sessions::finish_session))
        .route("/{id}/submit", post(handlers::sessions::submit_session))
        .route("/{id}/presence", post(handlers::sessions::report_presence))
        .route("/{id}/stream", get(handlers::sse::session_stream))
}
