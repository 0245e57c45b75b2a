//! Termination signals.
//!
//! Unix: SIGINT, SIGTERM and SIGQUIT. Elsewhere: Ctrl-C.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Wait for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancel `token` on the first termination signal.
pub fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => info!("shutdown signal received, finishing current recording"),
            Err(e) => {
                warn!(error = %e, "failed to listen for shutdown signals");
                return;
            }
        }
        token.cancel();
    });
}
