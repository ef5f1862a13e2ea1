use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::alerts::AlertRecord;
use super::{MetricsError, RequestSample, SystemSample};

/// On-disk shape of the time-series document.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    #[serde(default)]
    pub requests: Vec<RequestSample>,
    #[serde(default)]
    pub system_metrics: Vec<SystemSample>,
}

/// Durable, append-only persistence for request samples, system samples
/// and alerts.
///
/// Every write is a read-modify-write of the whole document. Each
/// document has its own async mutex so concurrent writers queue up
/// instead of losing each other's updates; the new document is written
/// to a sibling temp file and renamed into place.
pub struct MetricsStore {
    metrics_path: PathBuf,
    alerts_path: PathBuf,
    max_history_points: usize,
    /// 0 = keep every request sample
    max_request_samples: usize,
    metrics_lock: Mutex<()>,
    alerts_lock: Mutex<()>,
}

impl MetricsStore {
    /// Open (and create if missing) both documents.
    pub async fn open(
        metrics_path: impl Into<PathBuf>,
        alerts_path: impl Into<PathBuf>,
        max_history_points: usize,
    ) -> Result<Self, MetricsError> {
        let store = Self {
            metrics_path: metrics_path.into(),
            alerts_path: alerts_path.into(),
            max_history_points,
            max_request_samples: 0,
            metrics_lock: Mutex::new(()),
            alerts_lock: Mutex::new(()),
        };

        if !exists(&store.metrics_path).await {
            write_json_atomic(&store.metrics_path, &MetricsDocument::default()).await?;
            info!(path = %store.metrics_path.display(), "created metrics document");
        }
        if !exists(&store.alerts_path).await {
            write_json_atomic(&store.alerts_path, &Vec::<AlertRecord>::new()).await?;
            info!(path = %store.alerts_path.display(), "created alerts document");
        }

        Ok(store)
    }

    /// Cap the persisted request list to the newest `cap` entries.
    /// Diverges from the default keep-everything behaviour; 0 disables.
    pub fn with_request_cap(mut self, cap: usize) -> Self {
        self.max_request_samples = cap;
        self
    }

    pub fn max_history_points(&self) -> usize {
        self.max_history_points
    }

    pub async fn append_request(&self, sample: RequestSample) -> Result<(), MetricsError> {
        let _guard = self.metrics_lock.lock().await;

        let mut doc: MetricsDocument = read_json(&self.metrics_path).await?;
        doc.requests.push(sample);
        if self.max_request_samples > 0 {
            keep_newest(&mut doc.requests, self.max_request_samples);
        }
        write_json_atomic(&self.metrics_path, &doc).await
    }

    pub async fn append_system(&self, sample: SystemSample) -> Result<(), MetricsError> {
        let _guard = self.metrics_lock.lock().await;

        let mut doc: MetricsDocument = read_json(&self.metrics_path).await?;
        doc.system_metrics.push(sample);
        keep_newest(&mut doc.system_metrics, self.max_history_points);
        write_json_atomic(&self.metrics_path, &doc).await
    }

    /// Current contents of the time-series document.
    pub async fn load(&self) -> Result<MetricsDocument, MetricsError> {
        let _guard = self.metrics_lock.lock().await;
        read_json(&self.metrics_path).await
    }

    pub async fn append_alert(&self, record: AlertRecord) -> Result<(), MetricsError> {
        let _guard = self.alerts_lock.lock().await;

        let mut alerts: Vec<AlertRecord> = read_json(&self.alerts_path).await?;
        alerts.push(record);
        write_json_atomic(&self.alerts_path, &alerts).await
    }

    pub async fn alerts(&self) -> Result<Vec<AlertRecord>, MetricsError> {
        let _guard = self.alerts_lock.lock().await;
        read_json(&self.alerts_path).await
    }

    /// The last `n` alerts in append order (fewer if fewer exist).
    pub async fn recent_alerts(&self, n: usize) -> Result<Vec<AlertRecord>, MetricsError> {
        let mut alerts = self.alerts().await?;
        keep_newest(&mut alerts, n);
        Ok(alerts)
    }
}

/// Sliding window: drop from the front until at most `max` remain.
fn keep_newest<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// A missing file reads as the empty document.
async fn read_json<T>(path: &Path) -> Result<T, MetricsError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(MetricsError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| MetricsError::json(path, e))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), MetricsError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| MetricsError::json(path, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| MetricsError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| MetricsError::io(path, e))?;

    debug!(path = %path.display(), bytes = body.len(), "persisted metrics document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    async fn open_store(dir: &tempfile::TempDir, history: usize) -> MetricsStore {
        MetricsStore::open(
            dir.path().join("metrics_log.json"),
            dir.path().join("alerts_log.json"),
            history,
        )
        .await
        .unwrap()
    }

    fn system_sample(i: i64) -> SystemSample {
        SystemSample {
            timestamp: Utc::now() + Duration::seconds(i),
            cpu_percent: i as f64,
            memory_usage_mb: 100.0 + i as f64,
            uptime_seconds: i as f64,
        }
    }

    fn request_sample(endpoint: &str) -> RequestSample {
        RequestSample {
            timestamp: Utc::now(),
            endpoint: endpoint.into(),
            response_time: 0.25,
            status_code: 200,
        }
    }

    #[tokio::test]
    async fn open_creates_empty_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 60).await;

        assert_eq!(store.load().await.unwrap(), MetricsDocument::default());
        assert!(store.alerts().await.unwrap().is_empty());

        let raw = std::fs::read_to_string(dir.path().join("metrics_log.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"requests": [], "system_metrics": []}));
    }

    #[tokio::test]
    async fn system_history_keeps_newest_samples_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 5).await;

        for i in 0..12 {
            store.append_system(system_sample(i)).await.unwrap();
        }

        let doc = store.load().await.unwrap();
        assert_eq!(doc.system_metrics.len(), 5);
        let cpus: Vec<f64> = doc.system_metrics.iter().map(|s| s.cpu_percent).collect();
        assert_eq!(cpus, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[tokio::test]
    async fn request_samples_are_unbounded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 2).await;

        for _ in 0..10 {
            store.append_request(request_sample("/chat")).await.unwrap();
        }
        assert_eq!(store.load().await.unwrap().requests.len(), 10);
    }

    #[tokio::test]
    async fn request_cap_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 2).await.with_request_cap(3);

        for ep in ["/a", "/b", "/c", "/d", "/e"] {
            store.append_request(request_sample(ep)).await.unwrap();
        }
        let eps: Vec<String> = store
            .load()
            .await
            .unwrap()
            .requests
            .into_iter()
            .map(|r| r.endpoint)
            .collect();
        assert_eq!(eps, vec!["/c", "/d", "/e"]);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(&dir, 60).await);

        let mut handles = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_request(request_sample("/chat")).await.unwrap();
                store.append_alert(AlertRecord::new("x")).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.load().await.unwrap().requests.len(), 25);
        assert_eq!(store.alerts().await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn recent_alerts_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 60).await;

        for i in 0..8 {
            store.append_alert(AlertRecord::new(format!("alert {i}"))).await.unwrap();
        }
        let recent = store.recent_alerts(5).await.unwrap();
        let msgs: Vec<&str> = recent.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(msgs, vec!["alert 3", "alert 4", "alert 5", "alert 6", "alert 7"]);

        assert_eq!(store.recent_alerts(50).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, 60).await;
        std::fs::write(dir.path().join("metrics_log.json"), b"{not json").unwrap();

        let err = store.append_request(request_sample("/chat")).await.unwrap_err();
        assert!(matches!(err, MetricsError::Json { .. }));
    }
}
