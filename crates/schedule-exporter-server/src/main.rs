//! Schedule Exporter - HTTP service that signs in to the university portal
//! on a student's behalf and serves their class schedule as an iCalendar
//! feed or JSON document.

mod error;
mod routes;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use schedule_exporter_core::api::PortalClient;
use schedule_exporter_core::config::Config;
use schedule_exporter_core::coordinator::Coordinator;

use routes::AppState;

/// File name prefix for rolling log files
const LOG_FILE_PREFIX: &str = "schedule-exporter.log";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer on drop and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!(config = ?config, "Starting schedule exporter");

    let client = PortalClient::new(config.portal_url.clone())?;
    let coordinator = Coordinator::from_config(&config, Arc::new(client))
        .context("Failed to initialize export coordinator")?;
    let app = routes::router(AppState {
        coordinator: Arc::new(coordinator),
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Schedule exporter stopped");
    Ok(())
}
