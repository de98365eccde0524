//! Cancellation token for aborting in-flight requests.
//!
//! A token is handed to an orchestrated call through its options. Cancelling
//! any clone aborts the network call (or the backoff sleep between retries)
//! and the call resolves with [`TetherError::Cancelled`].
//!
//! # Example
//!
//! ```
//! use tether_core::cancel::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let upload_token = token.clone();
//!
//! // User pressed "stop"
//! token.cancel();
//! assert!(upload_token.is_cancelled());
//! ```

use crate::error::TetherError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Return `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<(), TetherError> {
        if self.is_cancelled() {
            Err(TetherError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the token fires first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, TetherError>
    where
        F: std::future::Future<Output = Result<T, TetherError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(TetherError::Cancelled),
            result = fut => result,
        }
    }
}
