use std::time::Duration;

use tokio::signal;

use crate::state::AppState;

/// How long exit waits for queued notifications and log writes.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping batch...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping batch...");
        }
    }
}

/// Cleanup after an interrupted batch. The in-flight item's lock and agent
/// process were released when its future was dropped; what remains is the
/// working tree and the detached tasks.
pub async fn graceful_shutdown(state: &AppState) {
    tracing::info!("Starting graceful shutdown...");

    if let Err(e) = state.workspace.return_to_default().await {
        tracing::warn!(error = %e, "Failed to return to the default branch during shutdown");
    }
    state.flush(FLUSH_TIMEOUT).await;

    tracing::info!("Graceful shutdown complete");
}
