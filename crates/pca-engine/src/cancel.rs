//! Cancellation
//!
//! A [`CancelHandle`] is held by whoever may abort a request; the run holds
//! the matching [`CancelToken`] and races every suspension point and tool
//! invocation against it.

use std::future::Future;
use tokio::sync::watch;

use pca_core::OrchestrationError;

/// Sender side: call [`CancelHandle::cancel`] to abort the run
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A token observing this handle
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
        tracing::info!("cancellation requested");
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side, cloned freely inside one run
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle
    /// is dropped without cancelling
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless cancellation wins the race first
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, OrchestrationError>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(OrchestrationError::Cancelled),
            output = fut => Ok(output),
        }
    }
}
