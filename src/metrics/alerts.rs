use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SystemSample;

/// Process-wide alert thresholds. Built once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertConfig {
    /// Seconds
    pub response_time_threshold: f64,
    /// Megabytes of resident memory
    pub memory_threshold: f64,
    /// Process CPU percent
    pub cpu_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            response_time_threshold: 1.0,
            memory_threshold: 1024.0,
            cpu_threshold: 80.0,
        }
    }
}

/// One threshold violation. Append-only; never edited or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl AlertRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

// ─── Threshold checks ────────────────────────────────────────────
//
// Strict `>` everywhere. No hysteresis or cooldown: two identical
// violating readings in a row produce two records.

/// Fires when `response_time` strictly exceeds the configured threshold.
pub fn check_response_time(
    endpoint: &str,
    response_time: f64,
    config: &AlertConfig,
) -> Option<AlertRecord> {
    (response_time > config.response_time_threshold).then(|| {
        AlertRecord::new(format!(
            "Slow response on {endpoint}: {response_time:.2}s"
        ))
    })
}

/// Memory and CPU are evaluated independently; both may fire at once.
pub fn check_system(sample: &SystemSample, config: &AlertConfig) -> Vec<AlertRecord> {
    let mut alerts = Vec::with_capacity(2);

    if sample.memory_usage_mb > config.memory_threshold {
        alerts.push(AlertRecord::new(format!(
            "High memory usage: {:.2}MB",
            sample.memory_usage_mb
        )));
    }
    if sample.cpu_percent > config.cpu_threshold {
        alerts.push(AlertRecord::new(format!(
            "High CPU usage: {:.2}%",
            sample.cpu_percent
        )));
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, mem: f64) -> SystemSample {
        SystemSample {
            timestamp: Utc::now(),
            cpu_percent: cpu,
            memory_usage_mb: mem,
            uptime_seconds: 1.0,
        }
    }

    #[test]
    fn response_time_threshold_is_strict() {
        let cfg = AlertConfig::default();
        assert!(check_response_time("/chat", 1.0, &cfg).is_none());
        assert!(check_response_time("/chat", 0.2, &cfg).is_none());

        let alert = check_response_time("/chat", 1.5, &cfg).unwrap();
        assert_eq!(alert.message, "Slow response on /chat: 1.50s");
    }

    #[test]
    fn system_checks_fire_independently() {
        let cfg = AlertConfig::default();

        assert!(check_system(&sample(10.0, 100.0), &cfg).is_empty());

        let mem_only = check_system(&sample(10.0, 2048.0), &cfg);
        assert_eq!(mem_only.len(), 1);
        assert_eq!(mem_only[0].message, "High memory usage: 2048.00MB");

        let cpu_only = check_system(&sample(95.5, 100.0), &cfg);
        assert_eq!(cpu_only.len(), 1);
        assert_eq!(cpu_only[0].message, "High CPU usage: 95.50%");

        let both = check_system(&sample(150.0, 4096.0), &cfg);
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn equal_readings_do_not_fire() {
        let cfg = AlertConfig::default();
        assert!(check_system(&sample(80.0, 1024.0), &cfg).is_empty());
    }

    #[test]
    fn repeated_violations_are_not_deduplicated() {
        let cfg = AlertConfig::default();
        let s = sample(99.0, 10.0);
        let first = check_system(&s, &cfg);
        let second = check_system(&s, &cfg);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }
}
