//! The error handler: applies the retry policy, invokes a caller-supplied
//! retry action, and classifies an error as recoverable or fatal.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::cancellation::CancellationToken;
use crate::retry::RetryPolicy;

/// Context describing the error an element raised, independent of how it
/// will be handled.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub element_key: String,
    pub category: String,
    pub message: String,
}

/// Outcome of [`ErrorHandler::handle_error`].
#[derive(Debug, Clone)]
pub enum ErrorResult {
    /// The retry action eventually succeeded, on the given attempt number.
    SuccessAfterRetry(u32),
    /// No recovery is possible; carries the final error message.
    Fatal(String),
}

/// Baseline fatal classification: the policy decides via `is_retryable`,
/// there are no absolute-fatal categories. Implementations may elevate
/// specific categories (e.g. programmer-error categories) by supplying a
/// different predicate.
pub fn is_fatal_baseline(_ctx: &ErrorContext) -> bool {
    false
}

pub struct ErrorHandler<'a> {
    is_fatal: &'a dyn Fn(&ErrorContext) -> bool,
}

impl<'a> Default for ErrorHandler<'a> {
    fn default() -> Self {
        Self {
            is_fatal: &is_fatal_baseline,
        }
    }
}

impl<'a> ErrorHandler<'a> {
    pub fn new(is_fatal: &'a dyn Fn(&ErrorContext) -> bool) -> Self {
        Self { is_fatal }
    }

    /// Apply `policy` against `ctx`, calling `retry_action(attempt)` for
    /// each attempt from 1 through `policy.max_retries`, waiting
    /// `policy.delay_for(attempt)` before each. `retry_action` returning
    /// `Ok(())` short-circuits with success; `Err` continues to the next
    /// attempt (or returns `Fatal` on the last one). A caller cancellation
    /// observed while waiting returns `Fatal` immediately.
    pub async fn handle_error<F, Fut>(
        &self,
        ctx: &ErrorContext,
        policy: &RetryPolicy,
        mut retry_action: F,
        cancellation: &CancellationToken,
    ) -> ErrorResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        error!(element = %ctx.element_key, category = %ctx.category, message = %ctx.message, "element error");

        if (self.is_fatal)(ctx) {
            return ErrorResult::Fatal(ctx.message.clone());
        }
        if !policy.is_retryable(&ctx.category) {
            return ErrorResult::Fatal(ctx.message.clone());
        }

        let mut last_error = ctx.message.clone();
        for attempt in 0..policy.max_retries {
            let delay_ms = policy.delay_for(attempt + 1);
            if delay_ms > 0 {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        return ErrorResult::Fatal("operation cancelled".to_string());
                    }
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
            warn!(element = %ctx.element_key, attempt = attempt + 1, "retrying element");
            match retry_action(attempt + 1).await {
                Ok(()) => return ErrorResult::SuccessAfterRetry(attempt + 1),
                Err(e) => last_error = e,
            }
        }
        ErrorResult::Fatal(last_error)
    }
}
