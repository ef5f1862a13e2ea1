use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::{MetricsAggregator, MetricsError, MetricsLogger};

// ─── Task registry ───────────────────────────────────────────────

/// Long-running jobs started alongside the HTTP server.
///
/// Every job watches the same shutdown channel and exits at its next
/// wake-up once `shutdown` is called.
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// A receiver for jobs that need to stop with the rest.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(task));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Signal every job and wait for all of them to return.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

// ─── System sampler ──────────────────────────────────────────────

/// Record one system sample immediately, then one every `period`.
pub async fn run_sampler(
    metrics: Arc<MetricsAggregator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match metrics.record_system_metrics().await {
                    Ok(sample) => debug!(
                        cpu = sample.cpu_percent,
                        memory_mb = sample.memory_usage_mb,
                        "system sample recorded"
                    ),
                    Err(e) => warn!(error = %e, "system sample failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

// ─── CSV snapshots ───────────────────────────────────────────────

/// Append the live summary to the CSV history.
pub async fn snapshot(
    metrics: &MetricsAggregator,
    logger: &Arc<MetricsLogger>,
) -> Result<usize, MetricsError> {
    let summary = metrics.get_summary().await;
    let logger = logger.clone();
    tokio::task::spawn_blocking(move || logger.log_metrics(&summary)).await?
}

/// Write a CSV snapshot every `period`, the first one a full period after start.
pub async fn run_snapshots(
    metrics: Arc<MetricsAggregator>,
    logger: Arc<MetricsLogger>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match snapshot(&metrics, &logger).await {
                    Ok(rows) => debug!(rows, "metrics snapshot written"),
                    Err(e) => warn!(error = %e, "metrics snapshot failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sampler::SystemSampler;
    use crate::metrics::{AlertConfig, MetricsStore, SystemSample};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSampler(Arc<AtomicUsize>);

    impl SystemSampler for CountingSampler {
        fn sample(&self) -> Result<SystemSample, MetricsError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SystemSample {
                timestamp: chrono::Utc::now(),
                cpu_percent: 5.0,
                memory_usage_mb: 100.0,
                uptime_seconds: 1.0,
            })
        }
    }

    async fn aggregator(dir: &tempfile::TempDir, count: Arc<AtomicUsize>) -> Arc<MetricsAggregator> {
        let store = MetricsStore::open(
            dir.path().join("metrics.json"),
            dir.path().join("alerts.json"),
            60,
        )
        .await
        .unwrap();
        Arc::new(MetricsAggregator::new(
            store,
            Box::new(CountingSampler(count)),
            AlertConfig::default(),
        ))
    }

    #[tokio::test]
    async fn sampler_runs_immediately_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let metrics = aggregator(&dir, count.clone()).await;

        let mut tasks = BackgroundTasks::new();
        let rx = tasks.subscribe();
        tasks.spawn(run_sampler(metrics.clone(), Duration::from_secs(3600), rx));
        assert_eq!(tasks.len(), 1);

        // First tick fires at once
        for _ in 0..100 {
            if count.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tasks.shutdown().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let doc = metrics.store().load().await.unwrap();
        assert_eq!(doc.system_metrics.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = aggregator(&dir, Arc::new(AtomicUsize::new(0))).await;
        metrics.record_request("/chat", 0.1, 200).await.unwrap();
        metrics.record_request("/health", 0.01, 200).await.unwrap();

        let logger = Arc::new(MetricsLogger::new(dir.path().join("history.csv")).unwrap());
        let rows = snapshot(&metrics, &logger).await.unwrap();

        assert_eq!(rows, 2);
        assert_eq!(logger.read_rows().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_wait_a_full_period() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = aggregator(&dir, Arc::new(AtomicUsize::new(0))).await;
        metrics.record_request("/chat", 0.1, 200).await.unwrap();
        let logger = Arc::new(MetricsLogger::new(dir.path().join("history.csv")).unwrap());

        let mut tasks = BackgroundTasks::new();
        let rx = tasks.subscribe();
        tasks.spawn(run_snapshots(
            metrics,
            logger.clone(),
            Duration::from_secs(300),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(logger.read_rows().unwrap().is_empty());

        tasks.shutdown().await;
    }
}
