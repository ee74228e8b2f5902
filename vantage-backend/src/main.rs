use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use vantage_backend::config::Config;
use vantage_backend::pipeline::Pipeline;
use vantage_backend::scheduler::TokioScheduler;
use vantage_backend::{commands, create_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Vantage analytics server...");
    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, storage={}, db_path={}, save_interval={}s, body_limit={}KB, timeout={}s",
        config.port,
        config.database_type,
        config.database_path,
        config.save_interval.as_secs(),
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
    );
    tracing::info!(
        "Analysis: boot_refresh={}, refresh_minutes={}, freshness={}s, inspect_ttl={}s",
        config.analysis_refresh_on_enable,
        config.analysis_refresh_minutes,
        config.analysis_freshness.as_secs(),
        config.inspect_cache_ttl.as_secs(),
    );

    let scheduler = Arc::new(TokioScheduler::new());
    let pipeline = Pipeline::start(config.clone(), scheduler)
        .await
        .context("storage could not be initialized, refusing to start")?;

    let console = tokio::spawn(run_console(Arc::clone(&pipeline)));

    let app = create_app(Arc::clone(&pipeline), &config);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        tracing::error!("Axum server error: {}", e);
    }

    console.abort();
    pipeline.stop().await;
    served.context("server stopped with an error")
}

/// Read operator commands from stdin, one per line.
async fn run_console(pipeline: Arc<Pipeline>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                tracing::info!("Executing console command '{}'", line.trim());
                for output in commands::run_line(&pipeline, &line).await {
                    tracing::info!("{}", output);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Console input error: {}", e);
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
