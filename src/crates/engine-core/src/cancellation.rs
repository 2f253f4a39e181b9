//! Cooperative cancellation, distinguishing caller-cancellation from
//! per-node timeouts.
//!
//! The element executor links two cancellation sources into the budget it
//! runs a node's `Execute` under: the caller's cancellation (propagated from
//! `PauseExecution`/`CancelExecution`) and a timer derived from the element's
//! own `timeout_seconds`. Which one fired matters — a caller cancellation
//! means the whole thread execution is being torn down; a timeout means only
//! this node ran out of time and `TimeoutBehavior` decides what happens
//! next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// A cooperative cancellation signal. Cloning shares the same underlying
/// flag; cancelling any clone cancels all of them.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once this token is cancelled. Used to race against a node's
    /// `Execute` future.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Which source caused a cancelled invocation to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Caller,
    Timeout,
}

/// Runs `fut` under a budget of `min(caller cancellation, timeout)`,
/// reporting which source fired first if either did.
pub async fn run_with_budget<F, T>(
    caller: &CancellationToken,
    timeout: Duration,
    fut: F,
) -> Result<T, CancelCause>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = caller.cancelled() => Err(CancelCause::Caller),
        _ = tokio::time::sleep(timeout) => Err(CancelCause::Timeout),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_on_caller_cancellation() {
        let token = CancellationToken::new();
        let token2 = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token2.cancel();
        });
        let result = run_with_budget(&token, Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "never"
        })
        .await;
        assert_eq!(result, Err(CancelCause::Caller));
    }

    #[tokio::test]
    async fn fires_on_timeout() {
        let token = CancellationToken::new();
        let result = run_with_budget(&token, Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "never"
        })
        .await;
        assert_eq!(result, Err(CancelCause::Timeout));
    }

    #[tokio::test]
    async fn returns_output_when_uncancelled() {
        let token = CancellationToken::new();
        let result = run_with_budget(&token, Duration::from_secs(10), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }
}
