use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub version: &'static str,
}

// ─── GET|HEAD / and /health ──────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_seconds: state.metrics.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{state_with, FakeProvider};
    use crate::server::create_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn root_and_health_report_ok() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), Arc::new(FakeProvider::default())).await;

        for uri in ["/", "/health"] {
            let resp = create_router(state.clone())
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);

            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["status"], "ok");
        }

        let head = create_router(state)
            .oneshot(Request::head("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(head.status(), StatusCode::OK);
    }
}
