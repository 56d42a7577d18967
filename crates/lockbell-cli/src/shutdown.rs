//! Cancel a command's context on Ctrl+C or SIGTERM

use tokio::task::JoinHandle;
use tracing::{info, warn};

use lockbell_common::Context;

/// Spawn a task that cancels `ctx` when the process is asked to stop.
pub fn cancel_on_signal(ctx: Context) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, canceling"),
            _ = terminate => info!("Received SIGTERM, canceling"),
            _ = ctx.done() => return,
        }

        ctx.cancel();
    })
}
