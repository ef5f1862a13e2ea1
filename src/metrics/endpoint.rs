use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-endpoint accumulator of every request seen since process start.
///
/// `response_times` and `status_codes` always grow in lockstep, one entry
/// pair per recorded request. Nothing is ever evicted.
#[derive(Debug, Default, Clone)]
pub struct EndpointStats {
    response_times: Vec<f64>,
    status_codes: Vec<u16>,
    last_request_time: Option<DateTime<Utc>>,
    alert_count: u64,
}

/// Summary statistics for one endpoint, shaped for the `/metrics` payload
/// and the CSV logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub total_requests: u64,
    pub avg_response_time: f64,
    pub median_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95_response_time: Option<f64>,
    /// Status code (as a string key) → occurrence count
    pub status_distribution: BTreeMap<String, u64>,
    pub alert_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request_time: Option<DateTime<Utc>>,
}

impl EndpointStats {
    /// Record one request completed at `at`.
    pub fn add_request(
        &mut self,
        response_time: f64,
        status_code: u16,
        at: DateTime<Utc>,
    ) {
        self.response_times.push(response_time.max(0.0));
        self.status_codes.push(status_code);
        self.last_request_time = Some(at);
    }

    /// Bump the response-time alert counter for this endpoint.
    pub fn record_alert(&mut self) {
        self.alert_count += 1;
    }

    pub fn alert_count(&self) -> u64 {
        self.alert_count
    }

    /// Compute the summary. Returns the all-zero shape when no request
    /// has been recorded yet.
    pub fn get_stats(&self) -> EndpointSnapshot {
        if self.response_times.is_empty() {
            return EndpointSnapshot::empty();
        }

        let mut sorted = self.response_times.clone();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let sum: f64 = sorted.iter().sum();

        let mut status_distribution = BTreeMap::new();
        for code in &self.status_codes {
            *status_distribution.entry(code.to_string()).or_insert(0u64) += 1;
        }

        EndpointSnapshot {
            total_requests: n as u64,
            avg_response_time: sum / n as f64,
            median_response_time: median(&sorted),
            min_response_time: sorted[0],
            max_response_time: sorted[n - 1],
            p95_response_time: Some(nearest_rank(&sorted, 0.95)),
            status_distribution,
            alert_count: self.alert_count,
            last_request_time: self.last_request_time,
        }
    }
}

impl EndpointSnapshot {
    /// All-zero placeholder used before any samples are recorded.
    pub fn empty() -> Self {
        Self {
            total_requests: 0,
            avg_response_time: 0.0,
            median_response_time: 0.0,
            min_response_time: 0.0,
            max_response_time: 0.0,
            p95_response_time: None,
            status_distribution: BTreeMap::new(),
            alert_count: 0,
            last_request_time: None,
        }
    }

    /// Percentage of responses that were exactly HTTP 200.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let ok = self.status_distribution.get("200").copied().unwrap_or(0);
        ok as f64 / self.total_requests as f64 * 100.0
    }
}

// ─── Order statistics over a sorted, non-empty slice ─────────────

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Nearest-rank selection at index `floor(q * n)`, clamped to the last
/// element.
fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    let idx = (q * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
