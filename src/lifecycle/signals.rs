//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM / SIGINT → trigger graceful shutdown
//! - SIGHUP → request a reload of the projects configuration
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a reload, not shutdown

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;
use crate::reload::ReloadOrchestrator;

/// Translate process signals into shutdown and reload requests.
pub fn spawn_signal_handler(
    shutdown: Shutdown,
    orchestrator: Arc<ReloadOrchestrator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signals(&orchestrator).await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    })
}

#[cfg(unix)]
async fn wait_for_signals(orchestrator: &ReloadOrchestrator) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut hangup) =
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(terminate), Ok(hangup)) => (terminate, hangup),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Cannot install unix signal handlers, only Ctrl+C is handled");
                ctrl_c().await;
                return;
            }
        };

    loop {
        tokio::select! {
            _ = ctrl_c() => return,
            _ = terminate.recv() => return,
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, requesting reload");
                orchestrator.request_reload("sighup");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_orchestrator: &ReloadOrchestrator) {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
