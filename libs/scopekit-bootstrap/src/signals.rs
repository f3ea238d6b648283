use anyhow::{Context, Result};
use tokio::signal;

/// Resolves on the first Ctrl+C, or SIGTERM on Unix.
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => tracing::info!("Received SIGTERM signal"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        tracing::info!("Received Ctrl+C signal");
    }

    Ok(())
}
