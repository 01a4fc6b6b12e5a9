//! HTTP listener and shutdown handling

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use hotvault_core::Config;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve `app` until SIGINT or SIGTERM. The sweeps are aborted once the listener closes.
pub async fn start_server(config: &Config, app: Router, sweeps: Vec<JoinHandle<()>>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port()));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(
        %addr,
        max_upload_mb = config.pipeline.max_upload_size_bytes / 1024 / 1024,
        max_chunk_mb = config.pipeline.max_chunk_size_bytes / 1024 / 1024,
        service_url = %config.tool.service_url,
        "Listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(stop_requested())
        .await;

    for sweep in &sweeps {
        sweep.abort();
    }
    served.context("server error")?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on the first stop signal. A signal source that cannot be installed is
/// logged and never fires.
async fn stop_requested() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    tracing::info!(signal = received, "Draining connections before shutdown");
}
