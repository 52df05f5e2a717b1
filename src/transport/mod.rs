//! Adapters that feed raw requests into the [`Dispatcher`](crate::dispatcher::Dispatcher)
//! and signal plumbing shared by the binaries.

pub mod http;
pub mod stdio;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::Registry;

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl_c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {}", e);
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Cancel `token` once a termination signal arrives.
pub fn cancel_on_shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => info!("shutdown signal received"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
}

/// Reload `registry` from `directory` on every SIGHUP until `shutdown` fires.
#[cfg(unix)]
pub fn reload_on_hangup(registry: Arc<Registry>, directory: PathBuf, shutdown: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("failed to register SIGHUP handler, reload on signal disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received, reloading providers from {}", directory.display());
                    if let Err(e) = registry.reload(&directory).await {
                        warn!("Provider reload failed, keeping previous catalog: {}", e);
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
pub fn reload_on_hangup(_registry: Arc<Registry>, _directory: PathBuf, _shutdown: CancellationToken) {}
