//! Cooperative shutdown signal.
//!
//! The driver checks the token between cycles and races it against sleeps;
//! nothing is cancelled mid-fetch.

use tokio::sync::watch;
use tracing::info;

/// Sending half, held by the signal listener.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request a clean exit.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half, cloned into whatever needs to observe shutdown.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Shutdown { rx })
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested.
    pub async fn wait(&mut self) {
        // An Err means the handle was dropped; treat that as shutdown too.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// Install SIGINT/SIGTERM handlers and trigger `handle` on the first signal.
pub async fn listen_for_signals(handle: ShutdownHandle) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                info!("Received signal to stop. Cleaning up...");
                handle.trigger();
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("Received signal to stop. Cleaning up...");
    handle.trigger();
}
