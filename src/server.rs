use axum::{
    http::{HeaderValue, Method},
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing::warn;

use crate::handlers;
use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes, middleware, and static serving.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();
    let cors = cors_layer(state.config.frontend_url.as_deref());

    Router::new()
        // ── Health (GET routes also answer HEAD) ────────────────
        .route("/", get(handlers::health::health))
        .route("/health", get(handlers::health::health))
        // ── Conversation ────────────────────────────────────────
        .route("/chat", post(handlers::chat::chat_with_memory))
        .route("/doc-chat", post(handlers::chat::chat_with_documents))
        // ── Metrics ─────────────────────────────────────────────
        .route("/metrics", get(stream::get_metrics))
        .route("/metrics/stream", get(stream::metrics_stream))
        .route("/metrics/report", get(stream::get_report))
        .route("/metrics/history", get(stream::get_history))
        .route("/metrics/latest", get(stream::get_latest))
        // ── Dashboard ───────────────────────────────────────────
        .route_service("/dashboard", ServeFile::new(static_dir.join("dashboard.html")))
        // ── Provide shared state to all routes above ────────────
        .with_state(state.clone())
        // ── Serve the static/ directory for dashboard assets ────
        .fallback_service(ServeDir::new(static_dir))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn_with_state(state, timing::timing_middleware))
        .layer(cors)
}

/// Restrict CORS to the configured frontend, or allow everything when no
/// frontend is configured.
fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let Some(url) = frontend_url else {
        return CorsLayer::permissive();
    };

    match HeaderValue::from_str(url) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::HEAD])
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
        Err(e) => {
            warn!(frontend_url = url, error = %e, "invalid FRONTEND_URL, allowing any origin");
            CorsLayer::permissive()
        }
    }
}
