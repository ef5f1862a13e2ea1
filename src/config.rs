//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::metrics::AlertConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the server reads at startup. Built once and shared read-only.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin. `None` means any origin.
    pub frontend_url: Option<String>,

    // ── Completion provider ─────────────────────────────────────
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub provider_timeout_secs: u64,

    // ── Persistence ─────────────────────────────────────────────
    pub metrics_file: PathBuf,
    pub alerts_file: PathBuf,
    pub metrics_csv: PathBuf,
    pub chat_log_file: PathBuf,

    // ── Retention (0 = unbounded where noted) ───────────────────
    pub max_history_points: usize,
    pub max_request_samples: usize,
    pub max_session_turns: usize,

    // ── Background jobs ─────────────────────────────────────────
    pub sample_interval_secs: u64,
    /// 0 disables the periodic CSV snapshot.
    pub snapshot_interval_secs: u64,
    pub smoke_test: bool,
    pub smoke_test_delay_secs: u64,

    pub alert: AlertConfig,

    // ── Documents & static assets ───────────────────────────────
    pub docs_dir: PathBuf,
    pub index_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// ## Server
    /// - `HOST` (default: "0.0.0.0")
    /// - `PORT` (default: "10000")
    /// - `FRONTEND_URL`: single allowed CORS origin (default: unset, any origin)
    ///
    /// ## Completion provider
    /// - `GEMINI_API_KEY`: unset leaves the server running, but chat requests fail
    /// - `GEMINI_MODEL` (default: "gemini-1.5-flash")
    /// - `GEMINI_BASE_URL` (default: "https://generativelanguage.googleapis.com")
    /// - `PROVIDER_TIMEOUT_SECS` (default: "30")
    ///
    /// ## Files
    /// - `METRICS_FILE` (default: "metrics_log.json")
    /// - `ALERTS_FILE` (default: "alerts_log.json")
    /// - `METRICS_CSV` (default: "metrics_history.csv")
    /// - `CHAT_LOG_FILE` (default: "chat_log.jsonl")
    /// - `DOCS_DIR` (default: "data"), `INDEX_DIR` (default: "index_store"),
    ///   `STATIC_DIR` (default: "static")
    ///
    /// ## Retention
    /// - `MAX_HISTORY_POINTS`: system samples kept on disk (default: "60", must be >= 1)
    /// - `MAX_REQUEST_SAMPLES`: request samples kept on disk (default: "0", unbounded)
    /// - `MAX_SESSION_TURNS`: turns kept per chat session (default: "0", unbounded)
    ///
    /// ## Background jobs
    /// - `SAMPLE_INTERVAL_SECS` (default: "60")
    /// - `SNAPSHOT_INTERVAL_SECS` (default: "300", "0" disables)
    /// - `SMOKE_TEST` (default: "true"), `SMOKE_TEST_DELAY_SECS` (default: "5")
    ///
    /// ## Alert thresholds
    /// - `ALERT_RESPONSE_TIME_SECS` (default: "1.0")
    /// - `ALERT_MEMORY_MB` (default: "1024")
    /// - `ALERT_CPU_PERCENT` (default: "80")
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        tracing::info!("Loading configuration from environment variables");
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = AlertConfig::default();

        let max_history_points = env.parse("MAX_HISTORY_POINTS", 60usize)?;
        if max_history_points == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_HISTORY_POINTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let config = Self {
            host: env.string("HOST", "0.0.0.0"),
            port: env.parse("PORT", 10000u16)?,
            frontend_url: env.optional("FRONTEND_URL"),
            gemini_api_key: env.optional("GEMINI_API_KEY"),
            gemini_model: env.string("GEMINI_MODEL", "gemini-1.5-flash"),
            gemini_base_url: env.string(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            provider_timeout_secs: env.parse("PROVIDER_TIMEOUT_SECS", 30u64)?,
            metrics_file: env.string("METRICS_FILE", "metrics_log.json").into(),
            alerts_file: env.string("ALERTS_FILE", "alerts_log.json").into(),
            metrics_csv: env.string("METRICS_CSV", "metrics_history.csv").into(),
            chat_log_file: env.string("CHAT_LOG_FILE", "chat_log.jsonl").into(),
            max_history_points,
            max_request_samples: env.parse("MAX_REQUEST_SAMPLES", 0usize)?,
            max_session_turns: env.parse("MAX_SESSION_TURNS", 0usize)?,
            sample_interval_secs: env.parse("SAMPLE_INTERVAL_SECS", 60u64)?.max(1),
            snapshot_interval_secs: env.parse("SNAPSHOT_INTERVAL_SECS", 300u64)?,
            smoke_test: env.parse("SMOKE_TEST", true)?,
            smoke_test_delay_secs: env.parse("SMOKE_TEST_DELAY_SECS", 5u64)?,
            alert: AlertConfig {
                response_time_threshold: env
                    .parse("ALERT_RESPONSE_TIME_SECS", defaults.response_time_threshold)?,
                memory_threshold: env.parse("ALERT_MEMORY_MB", defaults.memory_threshold)?,
                cpu_threshold: env.parse("ALERT_CPU_PERCENT", defaults.cpu_threshold)?,
            },
            docs_dir: env.string("DOCS_DIR", "data").into(),
            index_dir: env.string("INDEX_DIR", "index_store").into(),
            static_dir: env.string("STATIC_DIR", "static").into(),
        };

        tracing::info!(
            "Server - {}:{}, model: {}, history points: {}",
            config.host,
            config.port,
            config.gemini_model,
            config.max_history_points
        );

        Ok(config)
    }

    /// Address string for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Every file and directory rooted under `dir`; no API traffic leaves the test.
    #[cfg(test)]
    pub fn for_dir(dir: &std::path::Path) -> Self {
        let mut config = Self::from_lookup(|_| None).expect("defaults are valid");
        config.gemini_api_key = Some("test-key".into());
        config.gemini_base_url = "http://127.0.0.1:9".into();
        config.metrics_file = dir.join("metrics_log.json");
        config.alerts_file = dir.join("alerts_log.json");
        config.metrics_csv = dir.join("metrics_history.csv");
        config.chat_log_file = dir.join("chat_log.jsonl");
        config.docs_dir = dir.join("data");
        config.index_dir = dir.join("index_store");
        config.static_dir = dir.join("static");
        config.smoke_test = false;
        config
    }
}

// Helpers for reading and parsing individual variables

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank, trimmed.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }
}
