use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod background;
mod chat;
mod config;
mod docs;
mod handlers;
mod metrics;
mod middleware;
mod server;
mod smoke;

use background::BackgroundTasks;
use chat::{ChatEngine, ChatLogger, CompletionProvider, GeminiProvider};
use config::AppConfig;
use docs::{DocEngine, DocumentIndex};
use metrics::{MetricsAggregator, MetricsLogger, MetricsStore, ProcessSampler};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: AppConfig,

    /// Live request/system statistics backed by the JSON documents.
    pub metrics: Arc<MetricsAggregator>,

    /// CSV history of periodic snapshots.
    pub metrics_logger: Arc<MetricsLogger>,

    /// Per-session conversation memory in front of the completion provider.
    pub chat: ChatEngine,

    /// Retrieval over the local document set.
    pub docs: DocEngine,

    pub chat_log: ChatLogger,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    // ── 1. Configuration ─────────────────────────────────────────
    let config = AppConfig::from_env().context("invalid configuration")?;
    if config.gemini_api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; /chat and /doc-chat will answer 500");
    }

    // ── 2. Metrics ───────────────────────────────────────────────
    let store = MetricsStore::open(
        &config.metrics_file,
        &config.alerts_file,
        config.max_history_points,
    )
    .await
    .context("cannot open metrics store")?
    .with_request_cap(config.max_request_samples);

    let sampler = ProcessSampler::new().context("cannot start system sampler")?;
    let metrics = Arc::new(MetricsAggregator::new(store, Box::new(sampler), config.alert));
    let metrics_logger = Arc::new(
        MetricsLogger::new(&config.metrics_csv).context("cannot open metrics history")?,
    );

    // ── 3. Conversation & documents ──────────────────────────────
    let provider: Arc<dyn CompletionProvider> =
        Arc::new(GeminiProvider::new(&config).context("cannot build completion provider")?);

    let (docs_dir, index_dir) = (config.docs_dir.clone(), config.index_dir.clone());
    let index = tokio::task::spawn_blocking(move || DocumentIndex::load_or_build(&docs_dir, &index_dir))
        .await
        .context("document indexing panicked")?;
    tracing::info!(chunks = index.len(), "document index ready");

    // ── 4. Shared state ──────────────────────────────────────────
    let state = Arc::new(AppState {
        chat: ChatEngine::new(provider.clone(), config.max_session_turns),
        docs: DocEngine::new(index, provider),
        chat_log: ChatLogger::new(&config.chat_log_file),
        metrics: metrics.clone(),
        metrics_logger: metrics_logger.clone(),
        config,
    });
    let config = &state.config;

    // ── 5. Background jobs ───────────────────────────────────────
    let mut tasks = BackgroundTasks::new();
    tasks.spawn(background::run_sampler(
        metrics.clone(),
        Duration::from_secs(config.sample_interval_secs),
        tasks.subscribe(),
    ));
    if config.snapshot_interval_secs > 0 {
        tasks.spawn(background::run_snapshots(
            metrics.clone(),
            metrics_logger.clone(),
            Duration::from_secs(config.snapshot_interval_secs),
            tasks.subscribe(),
        ));
    }
    if config.smoke_test {
        let probe = smoke::SmokeProbe::new(format!("http://127.0.0.1:{}", config.port))
            .context("cannot build smoke probe client")?;
        tasks.spawn(smoke::run_smoke_test(
            probe,
            Duration::from_secs(config.smoke_test_delay_secs),
            metrics.clone(),
            metrics_logger.clone(),
            tasks.subscribe(),
        ));
    }

    // ── 6. Bind & serve ──────────────────────────────────────────
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}; is the port already in use?"))?;

    tracing::info!("Server listening on http://{addr}");
    tracing::info!("Dashboard    → http://{addr}/dashboard");
    tracing::info!("Metrics SSE  → http://{addr}/metrics/stream");

    let app = server::create_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    // ── 7. Drain background jobs ─────────────────────────────────
    tasks.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

/// Initialize logging.
///
/// The log level can be controlled via the `RUST_LOG` environment variable.
/// If it is not set, defaults to `reachout_server=debug,tower_http=info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reachout_server=debug,tower_http=info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "signal handlers unavailable, falling back to Ctrl+C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}
