use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::background;
use crate::metrics::{MetricsAggregator, MetricsLogger};

/// Paths exercised once the server is up
const PROBE_PATHS: &[&str] = &["/health", "/metrics"];

const MAX_ATTEMPTS: u32 = 3;

/// Fraction of each backoff step that is randomised
const JITTER: f64 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{path} unreachable: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} answered {status}")]
    Status { path: String, status: u16 },
}

/// Self-test against the server's own address.
pub struct SmokeProbe {
    client: reqwest::Client,
    base_url: String,
    initial_backoff: Duration,
}

impl SmokeProbe {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(500),
        })
    }

    #[cfg(test)]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// One GET; anything but a 2xx is a failure.
    async fn get_once(&self, path: &str) -> Result<u16, ProbeError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|source| ProbeError::Http {
                path: path.to_string(),
                source,
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ProbeError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            })
        }
    }

    /// GET `path` up to three times, doubling a jittered delay between tries.
    pub async fn probe(&self, path: &str) -> Result<u16, ProbeError> {
        let mut delay = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.get_once(path).await {
                Ok(status) => return Ok(status),
                Err(e) if attempt >= MAX_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(path, attempt, error = %e, "smoke probe failed, retrying");
                    tokio::time::sleep(jittered(delay)).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Probe every path; returns how many succeeded.
    pub async fn probe_all(&self) -> usize {
        let mut passed = 0;
        for path in PROBE_PATHS {
            match self.probe(path).await {
                Ok(status) => {
                    info!(path, status, "smoke probe passed");
                    passed += 1;
                }
                Err(e) => warn!(path, error = %e, "smoke probe gave up"),
            }
        }
        passed
    }
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
    base.mul_f64(factor)
}

/// Wait `delay`, probe the running server, then write one CSV snapshot.
/// Cancelled silently if shutdown starts first.
pub async fn run_smoke_test(
    probe: SmokeProbe,
    delay: Duration,
    metrics: Arc<MetricsAggregator>,
    logger: Arc<MetricsLogger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let work = async {
        tokio::time::sleep(delay).await;
        let passed = probe.probe_all().await;
        info!(passed, total = PROBE_PATHS.len(), "smoke test finished");

        if let Err(e) = background::snapshot(&metrics, &logger).await {
            warn!(error = %e, "post-smoke snapshot failed");
        }
    };

    tokio::select! {
        _ = work => {}
        _ = shutdown.changed() => {}
    }
}
