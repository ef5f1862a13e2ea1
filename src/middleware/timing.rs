use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::AppState;

/// Long-lived responses whose duration says nothing about latency
const UNTIMED_PATHS: &[&str] = &["/metrics/stream"];

/// Shared bucket for static assets and 404s, so arbitrary paths never
/// become endpoints of their own
pub const FALLBACK_ENDPOINT: &str = "<fallback>";

/// Times every request, records it in the metrics aggregator, and adds
///
///   Server-Timing: handler wall time in the standard format
///
/// Recording completes before the response is handed back. A recording
/// failure is logged and never changes the response.
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| FALLBACK_ENDPOINT.to_owned());

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    if UNTIMED_PATHS.contains(&endpoint.as_str()) {
        return response;
    }

    let status = response.status().as_u16();
    let secs = elapsed.as_secs_f64();

    if let Err(e) = state.metrics.record_request(&endpoint, secs, status).await {
        warn!(%endpoint, error = %e, "request metrics not persisted");
    }

    debug!(
        %method,
        %endpoint,
        status,
        ms = secs * 1000.0,
        "request completed"
    );

    response
}
