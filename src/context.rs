//! Cancellation context
//!
//! Every registry operation takes a [`Context`]. A context can be cancelled
//! explicitly, can carry a deadline, and can be derived into children that
//! observe their parent's cancellation and never outlive its deadline.

use crate::error::{Error, Result};
use futures::future::select_all;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation and deadline carrier for one logical caller
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    cancelled: watch::Sender<bool>,
    /// Effective deadline (the tighter of our own and the parent's)
    deadline: Option<Instant>,
    /// Cancellation flags of every ancestor, nearest first
    ancestors: Vec<watch::Receiver<bool>>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::build(None, Vec::new())
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline), Vec::new())
    }

    fn build(deadline: Option<Instant>, ancestors: Vec<watch::Receiver<bool>>) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                cancelled,
                deadline,
                ancestors,
            }),
        }
    }

    /// Derive a child that is cancelled whenever this context is
    pub fn child(&self) -> Self {
        self.child_with_deadline(None)
    }

    /// Derive a child with its own timeout, capped by this context's deadline
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child_with_deadline(Some(Instant::now() + timeout))
    }

    fn child_with_deadline(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };

        let mut ancestors = Vec::with_capacity(self.inner.ancestors.len() + 1);
        ancestors.push(self.inner.cancelled.subscribe());
        ancestors.extend(self.inner.ancestors.iter().cloned());

        Self::build(deadline, ancestors)
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.inner.cancelled.send_replace(true);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow() || self.inner.ancestors.iter().any(|rx| *rx.borrow())
    }

    /// Why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        let mut waits = Vec::with_capacity(self.inner.ancestors.len() + 1);
        waits.push(Box::pin(wait_cancelled(self.inner.cancelled.subscribe())));
        for rx in &self.inner.ancestors {
            waits.push(Box::pin(wait_cancelled(rx.clone())));
        }
        let cancelled = select_all(waits);

        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => {},
                    _ = tokio::time::sleep_until(deadline) => {},
                }
            }
            None => {
                cancelled.await;
            }
        }
    }

    /// Run `operation` unless the context finishes first
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            result = operation => result,
            _ = self.done() => Err(self.err().unwrap_or(Error::Cancelled)),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

/// Wait for a cancellation flag; a dropped sender can never cancel
async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.err().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();

        assert!(matches!(child.err(), Some(Error::Cancelled)));
        assert!(matches!(grandchild.err(), Some(Error::Cancelled)));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn test_child_deadline_capped_by_parent() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_done_resolves_on_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(5));
        ctx.done().await;
        assert!(matches!(ctx.err(), Some(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_run_returns_cancellation() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_short_circuits_when_already_done() {
        let ctx = Context::background();
        ctx.cancel();
        let result = ctx.run(async { Ok(1) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
