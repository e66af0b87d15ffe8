//! Notifications controller - hot-reloading controller process.
//!
//! This binary:
//! - Serves Prometheus metrics on a dedicated port for the life of the process
//! - Serves signed webhook callbacks and enqueues them for the controller
//! - Watches the settings files and swaps the running controller on change
//!
//! Settings errors are fatal: the process exits non-zero and relies on its
//! process manager to restart it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notifications::web::{self, AppState};
use notifications::{
    metrics, Config, FileSource, IntakeQueue, Metrics, NotificationControllerFactory, Supervisor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("controller_process_starting");
    info!(
        processors_count = config.processors_count,
        namespace = %config.namespace,
        app_label_selector = %config.app_label_selector,
        metrics_port = config.metrics_port,
        port = config.port,
        config_path = %config.config_path.display(),
        secrets_configured = config.secrets_path.is_some(),
        "config_loaded"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    // Metrics are served once for the whole process, independent of reloads
    let metrics = Metrics::new();
    spawn_server(
        "metrics",
        config.metrics_port,
        metrics::router(metrics.clone()),
        shutdown.clone(),
    )
    .await?;

    let intake = IntakeQueue::new(config.intake_capacity);
    let supervisor = Supervisor::new(
        NotificationControllerFactory::new(intake.clone()),
        config.supervisor_options(),
        metrics.clone(),
    );

    let state = AppState::new(
        supervisor.subscribe(),
        intake,
        metrics,
        config.signature_max_age(),
    );
    spawn_server("webhook", config.port, web::router(state), shutdown.clone()).await?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    let source = FileSource::new(
        config.config_path.clone(),
        config.secrets_path.clone(),
        config.poll_interval(),
        client,
    );

    info!(config_path = %config.config_path.display(), "loading_configuration");

    supervisor
        .run(source, shutdown.clone())
        .await
        .context("Controller supervisor failed")?;

    info!("controller_process_shutdown_complete");

    Ok(())
}

/// Bind `port` and serve `app` in the background until `shutdown` fires.
///
/// Binding happens before returning so a taken port fails startup.
async fn spawn_server(
    name: &'static str,
    port: u16,
    app: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} server to {}", name, addr))?;

    info!(server = name, address = %addr, "server_listening");

    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(server = name, error = %e, "server_failed");
        }
    });

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("controller_process_shutting_down");
}
