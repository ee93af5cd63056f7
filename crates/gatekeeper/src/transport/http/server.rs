//! HTTP server implementation.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::service::AdmissionService;

use super::routes::routes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long in-flight requests get to finish once shutdown starts.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Start the HTTP server with provided service.
///
/// Returns once the server has drained, or once `shutdown_timeout` has passed
/// after a shutdown signal, whichever comes first.
pub async fn serve(config: ServerConfig, service: Arc<AdmissionService>) -> anyhow::Result<()> {
    let shutdown = service.shutdown_token();
    let app = routes(Arc::clone(&service));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(
        limit = service.manager().limit(),
        "Starting gatekeeper server on {}", actual_addr
    );

    let drain = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain.cancelled().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result?;
            info!("Server stopped");
            return Ok(());
        }
        _ = shutdown_signal(shutdown) => {
            info!("Starting server shutdown...");
            service.trigger_shutdown();
        }
    }

    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(result) => {
            result?;
            info!("Server shutdown complete");
        }
        Err(_) => {
            warn!(
                timeout = ?config.shutdown_timeout,
                "Graceful shutdown timed out - dropping remaining connections"
            );
        }
    }

    Ok(())
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or /shutdown endpoint).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. That only happens when the
/// tokio runtime is misconfigured, which should fail fast at startup.
async fn shutdown_signal(explicit: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = explicit.cancelled() => {
            info!("Shutdown requested via /shutdown endpoint...");
        }
    }
}
