use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::alerts::{self, AlertConfig, AlertRecord};
use super::endpoint::{EndpointSnapshot, EndpointStats};
use super::sampler::SystemSampler;
use super::store::{MetricsDocument, MetricsStore};
use super::{MetricsError, RequestSample, SystemSample};

// ─── Configuration ───────────────────────────────────────────────

/// How many alerts the summary carries in `recent_alerts`
const RECENT_ALERTS: usize = 5;

const SECS_PER_HOUR: f64 = 3600.0;

// ─── Public types ────────────────────────────────────────────────

/// Orchestrates endpoint statistics, alerting, sampling and persistence.
/// The timing middleware calls `record_request()`, the sampler task calls
/// `record_system_metrics()`, `/metrics` calls `get_summary()`.
pub struct MetricsAggregator {
    endpoints: Mutex<HashMap<String, EndpointStats>>,
    store: MetricsStore,
    sampler: Box<dyn SystemSampler>,
    config: AlertConfig,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Complete view served by `/metrics` and fed to the CSV logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub endpoints: BTreeMap<String, EndpointSnapshot>,
    pub system_metrics: SystemMetricsView,
    pub alerts: AlertsView,
    pub general: GeneralInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsView {
    /// Most recent sample, `null` until the sampler has run once
    pub current: Option<SystemSample>,
    pub trends: SystemTrend,
}

/// Derived rates over the retained system history. Serializes as `{}`
/// when fewer than two samples exist.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemTrend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_change_per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsView {
    pub total_alerts: u64,
    pub recent_alerts: Vec<AlertRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralInfo {
    pub uptime_seconds: f64,
    pub start_time: DateTime<Utc>,
}

// ─── MetricsAggregator impl ──────────────────────────────────────

impl MetricsAggregator {
    pub fn new(store: MetricsStore, sampler: Box<dyn SystemSampler>, config: AlertConfig) -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            store,
            sampler,
            config,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Record one completed request.
    ///
    /// In-memory statistics are always updated; an error means only that
    /// the sample or its alert could not be persisted.
    pub async fn record_request(
        &self,
        endpoint: &str,
        response_time: f64,
        status_code: u16,
    ) -> Result<(), MetricsError> {
        let sample = RequestSample {
            timestamp: Utc::now(),
            endpoint: endpoint.to_owned(),
            response_time,
            status_code,
        };

        // Lock scope ends before any await
        let alert = {
            let mut endpoints = self.endpoints.lock();
            let stats = endpoints.entry(endpoint.to_owned()).or_default();
            stats.add_request(response_time, status_code, sample.timestamp);

            let alert = alerts::check_response_time(endpoint, response_time, &self.config);
            if alert.is_some() {
                stats.record_alert();
            }
            alert
        };

        let persisted = self.store.append_request(sample).await;

        let alerted = match alert {
            Some(alert) => {
                warn!(endpoint, response_time, "{}", alert.message);
                self.store.append_alert(alert).await
            }
            None => Ok(()),
        };

        persisted.and(alerted)
    }

    /// Take one system sample, persist it and run the resource checks.
    ///
    /// Every fired alert is written even when the sample or an earlier
    /// alert could not be; the first failure is returned.
    pub async fn record_system_metrics(&self) -> Result<SystemSample, MetricsError> {
        let sample = self.sampler.sample()?;
        let fired = alerts::check_system(&sample, &self.config);

        let mut result = self.store.append_system(sample.clone()).await;

        for alert in fired {
            warn!(
                cpu = sample.cpu_percent,
                memory_mb = sample.memory_usage_mb,
                "{}",
                alert.message
            );
            let appended = self.store.append_alert(alert).await;
            result = result.and(appended);
        }

        result.map(|()| sample)
    }

    /// Statistics for a single endpoint, if it has been seen.
    pub fn endpoint_stats(&self, endpoint: &str) -> Option<EndpointSnapshot> {
        self.endpoints.lock().get(endpoint).map(EndpointStats::get_stats)
    }

    /// Build the full summary from in-memory stats and persisted history.
    ///
    /// An unreadable document only blanks its part of the view: no current
    /// sample and no trend, or no recent alerts.
    pub async fn get_summary(&self) -> MetricsSummary {
        let doc = self.store.load().await.unwrap_or_else(|e| {
            warn!(error = %e, "metrics history unavailable for summary");
            MetricsDocument::default()
        });
        let recent_alerts = self
            .store
            .recent_alerts(RECENT_ALERTS)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "alert history unavailable for summary");
                Vec::new()
            });

        let (endpoints, total_alerts) = {
            let guard = self.endpoints.lock();
            let total: u64 = guard.values().map(EndpointStats::alert_count).sum();
            let stats = guard
                .iter()
                .map(|(name, s)| (name.clone(), s.get_stats()))
                .collect::<BTreeMap<_, _>>();
            (stats, total)
        };

        let history = &doc.system_metrics;
        let window_start = history.len().saturating_sub(self.store.max_history_points());
        let window = &history[window_start..];

        MetricsSummary {
            endpoints,
            system_metrics: SystemMetricsView {
                current: history.last().cloned(),
                trends: compute_trend(window),
            },
            alerts: AlertsView {
                total_alerts,
                recent_alerts,
            },
            general: GeneralInfo {
                uptime_seconds: self.uptime_seconds(),
                start_time: self.started_at,
            },
        }
    }
}

impl SystemTrend {
    pub fn is_empty(&self) -> bool {
        self.memory_change_per_hour.is_none() && self.cpu_average.is_none()
    }
}

/// Memory slope between the first and last sample (MB/hour) and mean CPU
/// over the window. The slope is omitted when no time has elapsed.
pub fn compute_trend(window: &[SystemSample]) -> SystemTrend {
    let (first, last) = match window {
        [first, .., last] => (first, last),
        _ => return SystemTrend::default(),
    };

    let elapsed_hours =
        (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0 / SECS_PER_HOUR;

    let memory_change_per_hour = (elapsed_hours > 0.0)
        .then(|| (last.memory_usage_mb - first.memory_usage_mb) / elapsed_hours);

    let cpu_average =
        window.iter().map(|s| s.cpu_percent).sum::<f64>() / window.len() as f64;

    SystemTrend {
        memory_change_per_hour,
        cpu_average: Some(cpu_average),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    /// Replays a fixed list of samples, then fails.
    struct ScriptedSampler(Mutex<VecDeque<SystemSample>>);

    impl ScriptedSampler {
        fn new(samples: Vec<SystemSample>) -> Box<Self> {
            Box::new(Self(Mutex::new(samples.into())))
        }
    }

    impl SystemSampler for ScriptedSampler {
        fn sample(&self) -> Result<SystemSample, MetricsError> {
            self.0
                .lock()
                .pop_front()
                .ok_or_else(|| MetricsError::Sampler("script exhausted".into()))
        }
    }

    fn sample_at(t: DateTime<Utc>, cpu: f64, mem: f64) -> SystemSample {
        SystemSample {
            timestamp: t,
            cpu_percent: cpu,
            memory_usage_mb: mem,
            uptime_seconds: 0.0,
        }
    }

    async fn aggregator(
        dir: &tempfile::TempDir,
        samples: Vec<SystemSample>,
        history: usize,
    ) -> MetricsAggregator {
        let store = MetricsStore::open(
            dir.path().join("metrics_log.json"),
            dir.path().join("alerts_log.json"),
            history,
        )
        .await
        .unwrap();
        MetricsAggregator::new(store, ScriptedSampler::new(samples), AlertConfig::default())
    }

    #[tokio::test]
    async fn chat_scenario_counts_and_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![], 60).await;

        for (rt, code) in [(0.2, 200), (1.5, 200), (0.3, 500)] {
            agg.record_request("/chat", rt, code).await.unwrap();
        }

        let stats = agg.endpoint_stats("/chat").unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(
            stats.status_distribution,
            BTreeMap::from([("200".to_string(), 2), ("500".to_string(), 1)])
        );
        assert_eq!(stats.alert_count, 1);

        let summary = agg.get_summary().await;
        assert_eq!(summary.alerts.total_alerts, 1);
        assert_eq!(summary.alerts.recent_alerts.len(), 1);
        assert_eq!(
            summary.alerts.recent_alerts[0].message,
            "Slow response on /chat: 1.50s"
        );
        assert_eq!(agg.store().load().await.unwrap().requests.len(), 3);
    }

    #[tokio::test]
    async fn threshold_equal_does_not_alert() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![], 60).await;

        agg.record_request("/doc-chat", 1.0, 200).await.unwrap();
        assert_eq!(agg.endpoint_stats("/doc-chat").unwrap().alert_count, 0);

        agg.record_request("/doc-chat", 1.01, 200).await.unwrap();
        agg.record_request("/doc-chat", 1.01, 200).await.unwrap();
        assert_eq!(agg.endpoint_stats("/doc-chat").unwrap().alert_count, 2);
    }

    #[tokio::test]
    async fn summary_before_any_sample() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![], 60).await;

        let summary = agg.get_summary().await;
        assert!(summary.endpoints.is_empty());
        assert!(summary.system_metrics.current.is_none());
        assert!(summary.system_metrics.trends.is_empty());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["system_metrics"]["current"], serde_json::Value::Null);
        assert_eq!(json["system_metrics"]["trends"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn trend_over_one_hour() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Utc::now();
        let agg = aggregator(
            &dir,
            vec![
                sample_at(t0, 10.0, 100.0),
                sample_at(t0 + Duration::hours(1), 30.0, 150.0),
            ],
            60,
        )
        .await;

        agg.record_system_metrics().await.unwrap();
        let one = agg.get_summary().await;
        assert!(one.system_metrics.trends.is_empty());
        assert_eq!(one.system_metrics.current.unwrap().memory_usage_mb, 100.0);

        agg.record_system_metrics().await.unwrap();
        let two = agg.get_summary().await;
        assert_eq!(two.system_metrics.trends.memory_change_per_hour, Some(50.0));
        assert_eq!(two.system_metrics.trends.cpu_average, Some(20.0));
    }

    #[test]
    fn zero_elapsed_omits_memory_slope() {
        let t = Utc::now();
        let trend = compute_trend(&[sample_at(t, 10.0, 100.0), sample_at(t, 20.0, 300.0)]);
        assert_eq!(trend.memory_change_per_hour, None);
        assert_eq!(trend.cpu_average, Some(15.0));
    }

    #[tokio::test]
    async fn system_alerts_are_persisted_but_not_counted_per_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Utc::now();
        let agg = aggregator(
            &dir,
            vec![
                sample_at(t0, 95.0, 2000.0),
                sample_at(t0 + Duration::minutes(1), 95.0, 2000.0),
            ],
            60,
        )
        .await;

        agg.record_system_metrics().await.unwrap();
        agg.record_system_metrics().await.unwrap();

        assert_eq!(agg.store().alerts().await.unwrap().len(), 4);
        let summary = agg.get_summary().await;
        assert_eq!(summary.alerts.total_alerts, 0);
        assert_eq!(summary.alerts.recent_alerts.len(), 4);
    }

    #[tokio::test]
    async fn recent_alerts_capped_at_five() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![], 60).await;

        for _ in 0..7 {
            agg.record_request("/chat", 2.0, 200).await.unwrap();
        }
        let summary = agg.get_summary().await;
        assert_eq!(summary.alerts.total_alerts, 7);
        assert_eq!(summary.alerts.recent_alerts.len(), 5);
    }

    #[tokio::test]
    async fn sampler_failure_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![], 60).await;

        let err = agg.record_system_metrics().await.unwrap_err();
        assert!(matches!(err, MetricsError::Sampler(_)));
        assert!(agg.get_summary().await.system_metrics.current.is_none());
    }

    #[tokio::test]
    async fn system_alerts_survive_unwritable_history() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![sample_at(Utc::now(), 95.0, 2048.0)], 60).await;
        std::fs::write(dir.path().join("metrics_log.json"), b"{not json").unwrap();

        let err = agg.record_system_metrics().await.unwrap_err();
        assert!(matches!(err, MetricsError::Json { .. }));

        let alerts = agg.store().alerts().await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].message, "High memory usage: 2048.00MB");
        assert_eq!(alerts[1].message, "High CPU usage: 95.00%");
    }

    #[tokio::test]
    async fn slow_request_alert_survives_unwritable_history() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![], 60).await;
        std::fs::write(dir.path().join("metrics_log.json"), b"{not json").unwrap();

        let err = agg.record_request("/chat", 2.0, 200).await.unwrap_err();
        assert!(matches!(err, MetricsError::Json { .. }));
        assert_eq!(agg.store().alerts().await.unwrap().len(), 1);
        assert_eq!(agg.endpoint_stats("/chat").unwrap().alert_count, 1);
    }

    #[tokio::test]
    async fn summary_degrades_when_documents_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir, vec![], 60).await;
        agg.record_request("/chat", 2.0, 200).await.unwrap();
        std::fs::write(dir.path().join("metrics_log.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("alerts_log.json"), b"nope").unwrap();

        let summary = agg.get_summary().await;
        assert_eq!(summary.endpoints["/chat"].total_requests, 1);
        assert_eq!(summary.alerts.total_alerts, 1);
        assert!(summary.alerts.recent_alerts.is_empty());
        assert!(summary.system_metrics.current.is_none());
        assert!(summary.system_metrics.trends.is_empty());
    }

    #[tokio::test]
    async fn history_window_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Utc::now();
        let samples = (0..6)
            .map(|i| sample_at(t0 + Duration::minutes(i), i as f64, 100.0))
            .collect();
        let agg = aggregator(&dir, samples, 3).await;

        for _ in 0..6 {
            agg.record_system_metrics().await.unwrap();
        }
        let doc = agg.store().load().await.unwrap();
        assert_eq!(doc.system_metrics.len(), 3);

        let summary = agg.get_summary().await;
        // mean of 3, 4, 5
        assert_eq!(summary.system_metrics.trends.cpu_average, Some(4.0));
    }
}
