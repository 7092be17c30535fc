//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use crate::state::AppState;
use std::sync::Arc;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::Notify;

/// Install a unix signal listener, logging when the platform refuses.
fn listen(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::error!(signal = name, error = %e, "Failed to install signal handler");
            None
        }
    }
}

/// Resolves on the next delivery, or never when the listener is missing.
async fn recv(stream: &mut Option<Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let mut sigterm = listen(SignalKind::terminate(), "SIGTERM");
    let mut sigint = listen(SignalKind::interrupt(), "SIGINT");

    tokio::select! {
        _ = recv(&mut sigterm) => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = recv(&mut sigint) => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// Only the control token and the credit policy are swapped at runtime.
/// Everything else needs a restart. Returns a Notify that stops the task.
pub fn spawn_config_reload_handler(state: AppState, config_loader: Arc<ConfigLoader>) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = listen(SignalKind::hangup(), "SIGHUP");

        loop {
            tokio::select! {
                _ = recv(&mut sighup) => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded) => {
                            if loaded.token_rewritten {
                                tracing::info!("Plaintext control token hashed and written back");
                            }
                            let version = state.config.admin.replace(loaded.admin).await;
                            state.config.credit.replace(loaded.credit).await;
                            tracing::info!(version, "Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}
