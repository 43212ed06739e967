//! Shutdown requests as messages.
//!
//! The signal listener only posts a notice. Whoever owns the workflows reacts
//! to it on its own task, so pausing never races with normal progress updates.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Sending half. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving half. Every clone observes the same request.
#[derive(Debug, Clone)]
pub struct ShutdownNotice {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownNotice) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownNotice { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownNotice {
        ShutdownNotice {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownNotice {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Never resolves if every trigger is
    /// dropped without firing.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Waits for SIGINT or SIGTERM and fires `trigger` once.
pub async fn listen_for_signals(trigger: ShutdownTrigger) {
    terminate_requested().await;
    info!("shutdown requested, finishing the current step");
    trigger.trigger();
}

#[cfg(unix)]
async fn terminate_requested() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM; only Ctrl-C will stop cleanly");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_requested() {
    let _ = tokio::signal::ctrl_c().await;
}
