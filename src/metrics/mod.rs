pub mod aggregator;
pub mod alerts;
pub mod endpoint;
pub mod logger;
pub mod report;
pub mod sampler;
pub mod store;
pub mod stream;

pub use aggregator::{MetricsAggregator, MetricsSummary};
pub use alerts::AlertConfig;
pub use logger::MetricsLogger;
pub use sampler::ProcessSampler;
pub use store::MetricsStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed HTTP request, as seen by the timing middleware.
/// The middleware creates these and the
/// store appends them to the time-series document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    /// Route path, e.g. "/chat"
    pub endpoint: String,
    /// Handler wall time in seconds
    pub response_time: f64,
    pub status_code: u16,
}

/// One reading of the current process's resource usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub timestamp: DateTime<Utc>,
    /// Process CPU since the previous reading; can exceed 100 on multi-core.
    pub cpu_percent: f64,
    /// Resident set size in megabytes
    pub memory_usage_mb: f64,
    pub uptime_seconds: f64,
}

// ─── Errors ──────────────────────────────────────────────────────

/// Everything that can go wrong while collecting or persisting metrics.
/// None of these are ever allowed to fail a user-facing request.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics document {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("metrics CSV log: {0}")]
    Csv(#[from] csv::Error),

    #[error("system sampler: {0}")]
    Sampler(String),

    #[error("blocking metrics task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MetricsError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn json(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.display().to_string(),
            source,
        }
    }
}
