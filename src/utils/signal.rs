//! Shutdown signal handling

use tracing::warn;

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
pub async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sig_int.recv() => warn!(signal = "SIGINT", "Signalled"),
        _ = sig_term.recv() => warn!(signal = "SIGTERM", "Signalled"),
    }
    Ok(())
}

/// Wait for Ctrl-C
#[cfg(not(unix))]
pub async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    warn!(signal = "ctrl-c", "Signalled");
    Ok(())
}
