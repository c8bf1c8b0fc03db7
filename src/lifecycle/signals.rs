//! OS signal handling.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGTERM and SIGINT both trigger graceful shutdown
//! - SIGHUP reopens the bus subscription without touching the engine

use tokio::signal;

use crate::lifecycle::Shutdown;

/// Resolve when SIGINT (Ctrl+C) or SIGTERM arrives.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Trigger `shutdown` on the first termination signal.
pub fn spawn_signal_handler(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("Shutdown signal received, stopping");
                shutdown.trigger();
            }
            _ = shutdown.wait() => {}
        }
    })
}

/// Receiver for SIGHUP. Never fires where the handler cannot be installed.
pub struct HangupSignal {
    #[cfg(unix)]
    inner: Option<signal::unix::Signal>,
}

impl HangupSignal {
    #[cfg(unix)]
    pub fn new() -> Self {
        let inner = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler");
                None
            }
        };
        Self { inner }
    }

    #[cfg(not(unix))]
    pub fn new() -> Self {
        Self {}
    }

    /// Resolve on the next SIGHUP.
    #[cfg(unix)]
    pub async fn recv(&mut self) {
        if let Some(signal) = self.inner.as_mut() {
            if signal.recv().await.is_some() {
                return;
            }
            self.inner = None;
        }
        std::future::pending::<()>().await;
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

impl Default for HangupSignal {
    fn default() -> Self {
        Self::new()
    }
}
