use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Cancel `cancel` when the process is asked to stop
///
/// Returns early if the token is cancelled by someone else first.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            info!("Cancelling calendar query");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

/// Platform-specific signal handling implementation
#[cfg(unix)]
async fn wait_for_signal() {
    // Handle SIGTERM (sent by process supervisors) and SIGINT (Ctrl+C)
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to create signal handler: {:?}", e);
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal, initiating graceful shutdown");
        }
    }
}

/// Platform-specific signal handling implementation
#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {:?}", e);
            std::future::pending::<()>().await;
        }
    }
}
