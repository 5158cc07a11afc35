//! Asynchronous operation poller
//!
//! Some backends answer a mutation with an operation id instead of a result.
//! [`Poller::wait`] turns that into a blocking call: it queries the status on
//! a fixed tick until the operation reaches a terminal state, the caller's
//! context finishes, or a status query fails.

use crate::context::Context;
use crate::error::{Error, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Default interval between status queries
pub const DEFAULT_POLL_TICK: Duration = Duration::from_millis(500);

/// Default budget for a single status query
pub const DEFAULT_STATUS_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Poller tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Interval between two status queries
    pub tick: Duration,
    /// Timeout of each status query, independent of the caller's context
    pub query_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_POLL_TICK,
            query_timeout: DEFAULT_STATUS_QUERY_TIMEOUT,
        }
    }
}

/// Backend-issued handle of an in-flight mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State reported by a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Submitted,
    Pending,
    Success,
    Fail,
    /// Any other terminal state the vendor reports
    Other(String),
}

impl OperationState {
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "SUBMITTED" => Self::Submitted,
            "PENDING" | "RUNNING" => Self::Pending,
            "SUCCESS" | "DONE" => Self::Success,
            "FAIL" | "FAILED" => Self::Fail,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::Pending)
    }
}

/// Result of one status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub id: OperationId,
    pub state: OperationState,
    /// Backend-supplied detail, e.g. the failure reason
    pub message: Option<String>,
}

impl OperationStatus {
    pub fn new(id: OperationId, state: OperationState) -> Self {
        Self {
            id,
            state,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Bounded polling loop for asynchronous mutations
#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollerConfig,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Query `status` once per tick until the operation is no longer in flight
    ///
    /// The first query happens one tick after the call. `Fail` becomes
    /// [`Error::OperationFailed`] with the backend's message; any other
    /// terminal state is returned as success. A query error is returned
    /// immediately, without retrying.
    pub async fn wait<F, Fut>(&self, ctx: &Context, mut status: F) -> Result<OperationStatus>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OperationStatus>>,
    {
        let mut ticker = tokio::time::interval(self.config.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        let mut polls: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = ctx.done() => return Err(ctx.err().unwrap_or(Error::Cancelled)),
                _ = ticker.tick() => {},
            }

            polls += 1;
            let current = tokio::select! {
                biased;
                _ = ctx.done() => return Err(ctx.err().unwrap_or(Error::Cancelled)),
                result = tokio::time::timeout(self.config.query_timeout, status()) => match result {
                    Ok(current) => current?,
                    Err(_) => return Err(Error::StatusQueryTimeout),
                },
            };

            match current.state {
                OperationState::Submitted | OperationState::Pending => {
                    tracing::trace!("operation {} still in flight (poll {})", current.id, polls);
                }
                OperationState::Fail => {
                    tracing::debug!("operation {} failed after {} polls", current.id, polls);
                    let message = current
                        .message
                        .unwrap_or_else(|| format!("operation {} failed", current.id));
                    return Err(Error::OperationFailed(message));
                }
                _ => {
                    tracing::debug!("operation {} completed after {} polls", current.id, polls);
                    return Ok(current);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn fast_poller() -> Poller {
        Poller::new(PollerConfig {
            tick: Duration::from_millis(2),
            query_timeout: Duration::from_secs(5),
        })
    }

    /// Status source replaying a fixed script of states
    fn scripted(
        states: Vec<OperationStatus>,
    ) -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<Result<OperationStatus>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(Mutex::new(VecDeque::from(states)));
        let counter = calls.clone();
        let query = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let next = script.lock().unwrap().pop_front();
            std::future::ready(Ok(next.expect("poller queried past the end of the script")))
        };
        (calls, query)
    }

    fn status(state: OperationState) -> OperationStatus {
        OperationStatus::new(OperationId::new("op-1"), state)
    }

    #[tokio::test]
    async fn test_pending_then_success() {
        let (calls, query) = scripted(vec![
            status(OperationState::Pending),
            status(OperationState::Pending),
            status(OperationState::Success),
        ]);

        let result = fast_poller().wait(&Context::background(), query).await;

        assert_eq!(result.unwrap().state, OperationState::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fail_carries_backend_message() {
        let (_, query) = scripted(vec![
            status(OperationState::Submitted),
            status(OperationState::Fail).with_message("namespace has services"),
        ]);

        let result = fast_poller().wait(&Context::background(), query).await;

        match result {
            Err(Error::OperationFailed(message)) => {
                assert!(message.contains("namespace has services"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_terminal_state_is_success() {
        let (_, query) = scripted(vec![status(OperationState::parse("COMPLETED_WITH_WARNINGS"))]);
        let result = fast_poller().wait(&Context::background(), query).await.unwrap();
        assert_eq!(
            result.state,
            OperationState::Other("COMPLETED_WITH_WARNINGS".to_string())
        );
    }

    #[tokio::test]
    async fn test_query_error_aborts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = fast_poller()
            .wait(&Context::background(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<OperationStatus, _>(Error::Transport(anyhow::anyhow!("connection reset")))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_pending_returns_context_error() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = fast_poller()
            .wait(&ctx, || async { Ok(status(OperationState::Pending)) })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_during_hanging_query() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = fast_poller()
            .wait(&ctx, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(status(OperationState::Success))
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let poller = Poller::new(PollerConfig {
            tick: Duration::from_millis(1),
            query_timeout: Duration::from_millis(10),
        });

        let result = poller
            .wait(&Context::background(), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(status(OperationState::Success))
            })
            .await;

        assert!(matches!(result, Err(Error::StatusQueryTimeout)));
    }

    #[tokio::test]
    async fn test_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(15));
        let result = fast_poller()
            .wait(&ctx, || async { Ok(status(OperationState::Pending)) })
            .await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(OperationState::parse("pending"), OperationState::Pending);
        assert_eq!(OperationState::parse("SUBMITTED"), OperationState::Submitted);
        assert_eq!(OperationState::parse("FAIL"), OperationState::Fail);
        assert!(OperationState::Pending.is_in_flight());
        assert!(!OperationState::Success.is_in_flight());
    }
}
