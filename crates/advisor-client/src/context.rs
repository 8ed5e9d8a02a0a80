//! Caller-supplied deadline and cancellation for advisory requests.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation signal governing one `ask`
#[derive(Debug, Clone)]
pub struct AskContext {
    deadline: Option<Instant>,
    cancel: watch::Receiver<bool>,
}

/// Cancels every context created from it
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace succeeds even when no receiver is alive
        self.tx.send_replace(true);
    }
}

impl AskContext {
    /// Context with no deadline that is never cancelled
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel: rx,
        }
    }

    /// Context cancelled through the returned handle
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: rx,
            },
            CancelHandle { tx },
        )
    }

    /// Context cancelled once `signal` turns true, e.g. a shutdown channel
    pub fn from_signal(signal: watch::Receiver<bool>) -> Self {
        Self {
            deadline: None,
            cancel: signal,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Add a deadline `timeout` from now; a timeout too large to represent
    /// leaves the context without one
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Whether the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = self.cancelled() => {}
                }
            }
            None => self.cancelled().await,
        }
    }

    async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for AskContext {
    fn default() -> Self {
        Self::background()
    }
}
