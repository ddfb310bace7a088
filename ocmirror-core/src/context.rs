//! Per-pass collection context
//!
//! Carries the configuration, options and cancellation signal of one
//! collection pass. Every operation of the collector receives it explicitly.

use tokio::sync::watch;

use crate::config::{CollectorOptions, ImageSetConfig};
use crate::error::CollectorError;

/// Cancels the collection pass it was created with
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CollectContext {
    pub config: ImageSetConfig,
    pub options: CollectorOptions,
    cancelled: watch::Receiver<bool>,
}

impl CollectContext {
    pub fn new(config: ImageSetConfig, options: CollectorOptions) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            config,
            options,
            cancelled: rx,
        };
        (ctx, CancelHandle { tx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Fail with [`CollectorError::Cancelled`] once cancellation was requested
    pub fn check(&self) -> Result<(), CollectorError> {
        if self.is_cancelled() {
            Err(CollectorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested
    ///
    /// Never resolves if every [`CancelHandle`] was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
