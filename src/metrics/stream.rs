use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tracing::warn;

use super::logger::MetricsRow;
use super::report::render_report;
use super::{MetricsError, MetricsSummary};
use crate::handlers::AppError;
use crate::AppState;

/// Dashboard refresh cadence for the SSE feed
const STREAM_INTERVAL: Duration = Duration::from_secs(5);

// ─── GET /metrics ────────────────────────────────────────────────

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSummary> {
    Json(state.metrics.get_summary().await)
}

// ─── GET /metrics/report ─────────────────────────────────────────

/// Plain-text rendering of the live summary.
pub async fn get_report(State(state): State<Arc<AppState>>) -> String {
    let summary = state.metrics.get_summary().await;
    render_report(&summary, chrono::Utc::now())
}

// ─── GET /metrics/history ────────────────────────────────────────

/// Digest of every snapshot appended to the CSV log.
pub async fn get_history(State(state): State<Arc<AppState>>) -> Result<String, AppError> {
    let logger = state.metrics_logger.clone();
    let text = tokio::task::spawn_blocking(move || logger.get_metrics_summary())
        .await
        .map_err(MetricsError::from)??;
    Ok(text)
}

// ─── GET /metrics/latest ─────────────────────────────────────────

/// Newest CSV snapshot row per endpoint.
pub async fn get_latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, MetricsRow>>, AppError> {
    let logger = state.metrics_logger.clone();
    let latest = tokio::task::spawn_blocking(move || logger.get_latest_metrics())
        .await
        .map_err(MetricsError::from)??;
    Ok(Json(latest))
}

// ─── GET /metrics/stream ─────────────────────────────────────────

/// Server-Sent Events endpoint.
/// Pushes a full `MetricsSummary` as JSON every few seconds.
pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(STREAM_INTERVAL);

    let stream = IntervalStream::new(interval).then(move |_| {
        let state = state.clone();
        async move {
            let summary = state.metrics.get_summary().await;
            let json = serde_json::to_string(&summary).unwrap_or_else(|e| {
                warn!(error = %e, "metrics stream could not encode summary");
                serde_json::json!({ "error": e.to_string() }).to_string()
            });
            Ok(Event::default().data(json))
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
