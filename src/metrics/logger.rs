use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{MetricsError, MetricsSummary};

const HEADERS: [&str; 10] = [
    "timestamp",
    "endpoint",
    "total_requests",
    "avg_response_time_ms",
    "success_rate",
    "alert_count",
    "cpu_percent",
    "memory_usage_mb",
    "memory_trend_mb_hour",
    "uptime_seconds",
];

const NO_DATA: &str = "No metrics data available.";

/// One CSV row: a single endpoint's numbers at snapshot time plus the
/// process-wide system readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub alert_count: u64,
    pub cpu_percent: f64,
    pub memory_usage_mb: f64,
    pub memory_trend_mb_hour: f64,
    pub uptime_seconds: f64,
}

/// Append-only CSV history of `MetricsSummary` snapshots.
pub struct MetricsLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetricsLogger {
    /// Create the log with its header row if it does not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, MetricsError> {
        let path = path.into();

        if !path.exists() {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(HEADERS)?;
            writer.flush().map_err(|e| MetricsError::io(&path, e))?;
            info!(path = %path.display(), "created metrics CSV log");
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Project the summary into rows, one per endpoint.
    pub fn rows_for(summary: &MetricsSummary, at: DateTime<Utc>) -> Vec<MetricsRow> {
        let current = summary.system_metrics.current.as_ref();
        let cpu = current.map(|s| s.cpu_percent).unwrap_or(0.0);
        let memory = current.map(|s| s.memory_usage_mb).unwrap_or(0.0);
        let trend = summary
            .system_metrics
            .trends
            .memory_change_per_hour
            .unwrap_or(0.0);

        summary
            .endpoints
            .iter()
            .map(|(endpoint, stats)| MetricsRow {
                timestamp: at,
                endpoint: endpoint.clone(),
                total_requests: stats.total_requests,
                avg_response_time_ms: round2(stats.avg_response_time * 1000.0),
                success_rate: round2(stats.success_rate()),
                alert_count: stats.alert_count,
                cpu_percent: cpu,
                memory_usage_mb: round2(memory),
                memory_trend_mb_hour: round2(trend),
                uptime_seconds: round2(summary.general.uptime_seconds),
            })
            .collect()
    }

    /// Append one row per endpoint. Never deduplicates: logging the same
    /// summary twice yields two rows per endpoint. Returns rows written.
    pub fn log_metrics(&self, summary: &MetricsSummary) -> Result<usize, MetricsError> {
        let rows = Self::rows_for(summary, Utc::now());

        let _guard = self.write_lock.lock();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MetricsError::io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for row in &rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|e| MetricsError::io(&self.path, e))?;

        debug!(rows = rows.len(), "appended metrics snapshot");
        Ok(rows.len())
    }

    /// Every row logged so far, oldest first. Empty if the file is gone.
    pub fn read_rows(&self) -> Result<Vec<MetricsRow>, MetricsError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        reader
            .deserialize()
            .collect::<Result<Vec<MetricsRow>, _>>()
            .map_err(MetricsError::from)
    }

    /// The most recent row for each endpoint.
    pub fn get_latest_metrics(&self) -> Result<BTreeMap<String, MetricsRow>, MetricsError> {
        let mut latest = BTreeMap::new();
        for row in self.read_rows()? {
            latest.insert(row.endpoint.clone(), row);
        }
        Ok(latest)
    }

    /// Human-readable digest of the whole history, grouped by endpoint in
    /// first-seen order.
    pub fn get_metrics_summary(&self) -> Result<String, MetricsError> {
        let rows = self.read_rows()?;
        let Some(latest) = rows.last() else {
            return Ok(NO_DATA.to_string());
        };

        let mut groups: Vec<(&str, Vec<&MetricsRow>)> = Vec::new();
        for row in &rows {
            match groups.iter_mut().find(|(ep, _)| *ep == row.endpoint) {
                Some((_, group)) => group.push(row),
                None => groups.push((&row.endpoint, vec![row])),
            }
        }

        let mut out = String::from("Metrics Summary\n===============\n\n");
        for (endpoint, group) in &groups {
            let n = group.len() as f64;
            let avg_rt = group.iter().map(|r| r.avg_response_time_ms).sum::<f64>() / n;
            let avg_success = group.iter().map(|r| r.success_rate).sum::<f64>() / n;
            let total_alerts: u64 = group.iter().map(|r| r.alert_count).sum();
            let total_requests = group.last().map(|r| r.total_requests).unwrap_or(0);

            let _ = writeln!(out, "Endpoint: {endpoint}");
            let _ = writeln!(out, "{}", "-".repeat(endpoint.len() + 10));
            let _ = writeln!(out, "Average Response Time: {avg_rt:.2}ms");
            let _ = writeln!(out, "Average Success Rate: {avg_success:.2}%");
            let _ = writeln!(out, "Total Alerts: {total_alerts}");
            let _ = writeln!(out, "Total Requests: {total_requests}\n");
        }

        out.push_str("Current System Metrics\n---------------------\n");
        let _ = writeln!(out, "CPU Usage: {}%", latest.cpu_percent);
        let _ = writeln!(out, "Memory Usage: {} MB", latest.memory_usage_mb);
        let _ = writeln!(out, "Memory Trend: {} MB/hour", latest.memory_trend_mb_hour);

        Ok(out)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
