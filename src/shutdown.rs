//! # Process shutdown.
//!
//! [`cancel_on_signal`] ties a [`CancellationToken`] to the process termination
//! signals, so the listener and the plane's background tasks stop together.
//!
//! Unix: `SIGINT`, `SIGTERM`, `SIGQUIT`. Elsewhere: Ctrl-C.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Completes on the first termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Completes on the first termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancels `token` on the first termination signal, or when registration fails.
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => return,
        r = wait_for_shutdown_signal() => match r {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(err = %e, "signal handler unavailable; shutting down"),
        },
    }
    token.cancel();
}
