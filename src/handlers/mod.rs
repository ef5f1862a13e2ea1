pub mod chat;
pub mod health;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::chat::ProviderError;
use crate::metrics::MetricsError;

// ─── Shared request / response envelopes ─────────────────────────

/// Body of `POST /chat` and `POST /doc-chat`.
///
/// Older clients send `{message}` instead of `{session_id, query}`; those
/// get a fresh session each call.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "new_session_id")]
    pub session_id: String,
    #[serde(alias = "message")]
    pub query: String,
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Body of `POST /doc-chat`. A missing `query` is an empty question.
#[derive(Debug, Clone, Deserialize)]
pub struct DocChatRequest {
    #[serde(default = "new_session_id")]
    pub session_id: String,
    #[serde(default, alias = "message")]
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub response: String,
}

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Metrics(#[from] MetricsError),

    /// Body missing, not JSON, or the wrong shape
    #[error("{0}")]
    InvalidBody(#[from] JsonRejection),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidBody(rejection) => rejection.status(),
            Self::Provider(_) | Self::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error":  self.to_string(),
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::chat::{ChatEngine, ChatLogger, CompletionProvider, ProviderError, Turn};
    use crate::config::AppConfig;
    use crate::docs::{DocEngine, DocumentIndex};
    use crate::metrics::sampler::SystemSampler;
    use crate::metrics::{
        AlertConfig, MetricsAggregator, MetricsError, MetricsLogger, MetricsStore, SystemSample,
    };
    use crate::AppState;

    /// Echoes the last user turn and counts calls; optionally fails.
    #[derive(Default)]
    pub struct FakeProvider {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    #[async_trait]
    impl CompletionProvider for FakeProvider {
        async fn generate(&self, turns: &[Turn]) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Api {
                    status: 503,
                    message: "model overloaded".into(),
                });
            }
            Ok(format!("echo({} turns)", turns.len()))
        }
    }

    struct IdleSampler;

    impl SystemSampler for IdleSampler {
        fn sample(&self) -> Result<SystemSample, MetricsError> {
            Ok(SystemSample {
                timestamp: chrono::Utc::now(),
                cpu_percent: 1.0,
                memory_usage_mb: 64.0,
                uptime_seconds: 1.0,
            })
        }
    }

    pub async fn state_with(dir: &Path, provider: Arc<FakeProvider>) -> Arc<AppState> {
        let config = AppConfig::for_dir(dir);

        let store = MetricsStore::open(&config.metrics_file, &config.alerts_file, 60)
            .await
            .unwrap();
        let metrics = MetricsAggregator::new(store, Box::new(IdleSampler), AlertConfig::default());

        Arc::new(AppState {
            metrics: Arc::new(metrics),
            metrics_logger: Arc::new(MetricsLogger::new(&config.metrics_csv).unwrap()),
            chat: ChatEngine::new(provider.clone(), 0),
            docs: DocEngine::new(DocumentIndex::default(), provider),
            chat_log: ChatLogger::new(&config.chat_log_file),
            config,
        })
    }
}
