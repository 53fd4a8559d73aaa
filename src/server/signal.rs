// Signal handling module
//
// Supported signals:
// - SIGTERM: Graceful shutdown
// - SIGINT:  Graceful shutdown (Ctrl+C)

use std::sync::Arc;
use tokio::sync::Notify;

use crate::logger;

/// Spawn a task that fires `shutdown` on SIGINT or SIGTERM (Unix).
///
/// `notify_one` stores a permit, so a signal that arrives while the accept
/// loop is busy is not lost.
#[cfg(unix)]
pub fn start_signal_handler(shutdown: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    logger::log_error(&format!("Failed to register signal handlers: {e}"));
                    wait_for_ctrl_c(&shutdown).await;
                    return;
                }
            };

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        logger::log_shutdown(name);
        shutdown.notify_one();
    });
}

/// Non-Unix fallback: only Ctrl+C
#[cfg(not(unix))]
pub fn start_signal_handler(shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        wait_for_ctrl_c(&shutdown).await;
    });
}

async fn wait_for_ctrl_c(shutdown: &Notify) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            logger::log_shutdown("Ctrl+C");
            shutdown.notify_one();
        }
        Err(e) => logger::log_error(&format!("Failed to listen for Ctrl+C: {e}")),
    }
}
