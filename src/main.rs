use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use planner_agent::agent::Orchestrator;
use planner_agent::api::{self, AppState};
use planner_agent::config::{OrchestratorConfig, ProcessorConfig, ServerConfig};
use planner_agent::jobs::JobProcessor;
use planner_agent::llm::{LlmConfig, create_provider};
use planner_agent::store::{Database, LibSqlBackend};
use planner_agent::workers::WorkerRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Held until exit so buffered log lines are flushed.
    let _log_guard = init_tracing();

    let server_config = ServerConfig::from_env();
    server_config.validate().context("invalid server configuration")?;
    let llm_config = LlmConfig::from_env();

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&server_config.db_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open database at {}",
                    server_config.db_path.display()
                )
            })?,
    );

    // ── Agent ────────────────────────────────────────────────────────────
    let llm = create_provider(&llm_config).context("failed to create LLM provider")?;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        Arc::clone(&llm),
        OrchestratorConfig::from_env(),
    ));

    // ── Job processing ───────────────────────────────────────────────────
    let processor_config = ProcessorConfig::from_env();
    processor_config
        .validate()
        .context("invalid processor configuration")?;
    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&db),
        Some(llm),
        Arc::new(WorkerRegistry::new()),
        processor_config,
    ));
    // Claims left behind by a previous run.
    if let Err(e) = processor.sweep_stale().await {
        warn!(error = %e, "Startup stale job sweep failed");
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = processor.spawn(shutdown_rx);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let port = server_config.port;
    let environment = server_config.environment;
    let state = AppState {
        db,
        orchestrator,
        processor,
        config: Arc::new(server_config),
    };
    let app = api::router(state);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(
        port,
        environment = ?environment,
        model = %llm_config.model,
        version = env!("CARGO_PKG_VERSION"),
        "Planner agent listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    for result in futures::future::join_all(loops).await {
        if let Err(e) = result {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

/// Log to stderr, or to a daily rolling file under `PLANNER_LOG_DIR`.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("PLANNER_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "planner-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
