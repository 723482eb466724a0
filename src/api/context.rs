//! Execution context carrying cancellation and deadlines.
//!
//! Every call that can block takes an [`EvalContext`]. A context is cancelled
//! through the [`CancelHandle`] returned when it was derived, or expires when
//! its deadline passes. Derived contexts inherit their parent's cancellation
//! signals and keep the earlier of the two deadlines.

use crate::{Error, Result};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation and deadline signals for one operation.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels the context it was created with, and every context derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel the associated context. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether [`CancelHandle::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl EvalContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that can be cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(receiver);
        (
            child,
            CancelHandle {
                sender: Arc::new(sender),
            },
        )
    }

    /// Derive a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`, unless this one expires first.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        child
    }

    /// The instant this context expires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<Error> {
        if self.signals.iter().any(|signal| *signal.borrow()) {
            return Some(Error::cancelled());
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::deadline_exceeded()),
            _ => None,
        }
    }

    /// Fail if the context is already done.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or expires.
    pub async fn done(&self) -> Error {
        let cancelled = async {
            if self.signals.is_empty() {
                return std::future::pending::<()>().await;
            }

            let waits = self.signals.iter().cloned().map(|mut signal| {
                Box::pin(async move {
                    // A dropped handle can no longer cancel.
                    let closed = signal.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        std::future::pending::<()>().await;
                    }
                })
            });
            futures::future::select_all(waits).await;
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => Error::cancelled(),
            _ = expired => Error::deadline_exceeded(),
        }
    }

    /// Drive `future` to completion unless the context finishes first.
    ///
    /// A context that is already done fails without polling `future`.
    pub async fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            output = future => Ok(output),
        }
    }
}
