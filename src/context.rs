// src/context.rs
// Request-scoped deadline and cancellation. The context is the single source
// of truth: every suspension point on the request path races against it.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline plus cancellation flag for one request.
///
/// Children created with [`RequestContext::child`] inherit the cancellation
/// flag and may shorten the deadline but never extend it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancelled: watch::Receiver<bool>,
}

/// Owner side of a context's cancellation flag.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the context and every child derived from it.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl RequestContext {
    /// A root context expiring `timeout` from now, with its cancel handle.
    pub fn with_timeout(timeout: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: Instant::now() + timeout,
                cancelled: rx,
            },
            CancelHandle { tx },
        )
    }

    /// A context that can only expire, never be cancelled. Used for detached
    /// best-effort work such as the post-cancellation cache store.
    pub fn detached(timeout: Duration) -> Self {
        // Dropping the sender immediately means the flag can never flip;
        // `cancelled()` treats a closed channel as never-cancelled.
        let (_tx, rx) = watch::channel(false);
        Self {
            deadline: Instant::now() + timeout,
            cancelled: rx,
        }
    }

    /// Child context sharing the cancellation flag, with the deadline
    /// shortened to at most `budget` from now.
    pub fn child(&self, budget: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + budget),
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves when the context is cancelled. Never resolves for detached
    /// contexts.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        // wait_for returns Err only when the sender is dropped; a dropped
        // handle means cancellation can no longer happen, so park forever.
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` racing the deadline and the cancellation flag.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ContextError>
    where
        F: std::future::Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancelled() => Err(ContextError::Cancelled),
            out = tokio::time::timeout_at(self.deadline, fut) => {
                out.map_err(|_| ContextError::DeadlineExceeded)
            }
        }
    }
}

/// Why a context-guarded future did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("cancelled")]
    Cancelled,
}
