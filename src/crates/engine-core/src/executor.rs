//! The node executor contract.
//!
//! An executor is a black box implementation of one node type. The engine
//! never inspects what a node does — it only calls the four capabilities
//! every executor exposes, plus whichever variant extension applies to the
//! node's role (decision, integration, trigger). Node-type implementations
//! (HTTP, email, JSON transform, …) live outside this crate; this module
//! defines only the seam they plug into.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::cancellation::CancellationToken;
use crate::context::ElementExecutionContext;
use crate::error::{EngineResult, ErrorCategory};
use crate::model::Element;

/// Outcome of `Executor::validate`.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

/// Reserved port labels with the meanings implied by the router and error
/// handling design.
pub mod ports {
    pub const MAIN: &str = "main";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";
    pub const BODY: &str = "body";
    pub const DONE: &str = "done";
    pub const BREAK: &str = "break";
    pub const CONTINUE: &str = "continue";
}

/// The result of one node invocation: which output port fired and what data
/// it carries.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub output_port: String,
    pub output_data: HashMap<String, Value>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl NodeResult {
    pub fn success(port: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            output_port: port.into(),
            output_data: data,
            success: true,
            error_message: None,
        }
    }

    pub fn failure(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            output_port: port.into(),
            output_data: HashMap::new(),
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Result of a trigger executor's `listen` call: did an external event
/// activate the thread, and if so with what payload.
#[derive(Debug, Clone)]
pub struct ActivationResult {
    pub activated: bool,
    pub payload: Option<HashMap<String, Value>>,
}

/// The core executor contract every node type implements.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Reject an element before `execute` is ever called.
    async fn validate(&self, element: &Element, ctx: &ElementExecutionContext) -> ValidationResult;

    /// Run the node. Callers wrap this in the per-node cancellation budget
    /// (see [`crate::cancellation::run_with_budget`]); executors do not need
    /// to handle their own timeout.
    async fn execute(&self, ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult>;

    /// Called when `execute` returns an error (not a timeout). If this
    /// returns `Some`, that result is used in place of a failed `NodeResult`
    /// on the `error` port.
    async fn handle_error(
        &self,
        ctx: &mut ElementExecutionContext,
        error: &crate::error::EngineError,
        _cancellation: &CancellationToken,
    ) -> Option<NodeResult> {
        let _ = (ctx, error);
        None
    }

    /// Release any resources the executor is holding for this invocation.
    async fn cleanup(&self, ctx: &mut ElementExecutionContext) {
        let _ = ctx;
    }

    /// The stable category this executor reports failures under, used by
    /// [`crate::memory::ExecutionMemory::find_catch_handler`] and the retry
    /// policy's allow-list. Defaults to a generic executor-error category.
    fn error_category(&self) -> ErrorCategory {
        "ExecutorError".to_string()
    }
}

/// Extension for decision nodes (e.g. `If`, `Switch`): choose an output port
/// from the element's condition rather than always routing `success`.
#[async_trait]
pub trait DecisionExecutor: NodeExecutor {
    async fn evaluate_condition(&self, ctx: &ElementExecutionContext) -> EngineResult<String>;
}

/// Extension for integration nodes that call an external service as part of
/// `execute`.
#[async_trait]
pub trait IntegrationExecutor: NodeExecutor {
    async fn invoke_external_service(&self, ctx: &ElementExecutionContext) -> EngineResult<Value>;
}

/// Extension for trigger nodes: an entry point that becomes active when an
/// external event arrives.
#[async_trait]
pub trait TriggerExecutor: NodeExecutor {
    async fn listen(&self, ctx: &ElementExecutionContext) -> EngineResult<ActivationResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_result_success_carries_data() {
        let mut data = HashMap::new();
        data.insert("x".to_string(), Value::from(1));
        let result = NodeResult::success(ports::SUCCESS, data.clone());
        assert!(result.success);
        assert_eq!(result.output_port, "success");
        assert_eq!(result.output_data, data);
    }

    #[test]
    fn node_result_failure_has_error_port_and_message() {
        let result = NodeResult::failure(ports::ERROR, "boom");
        assert!(!result.success);
        assert_eq!(result.output_port, "error");
        assert_eq!(result.error_message.as_deref(), Some("boom"));
    }
}
