//! Demo node executors registered by the `run` command.
//!
//! These are intentionally small: enough to drive a YAML definition through
//! the orchestration loop without a real integration surface behind them.

use std::collections::HashMap;

use async_trait::async_trait;
use engine_core::{ElementExecutionContext, EngineResult, NodeExecutor, NodeResult, ValidationResult};
use engine_core::executor::ports;
use engine_core::model::Element;
use serde_json::Value;
use tracing::info;

/// Copies its input straight through to the `success` port. Stands in for
/// any node type the definition references that has no demo behavior of its
/// own — useful for sketching a shape before wiring a real integration.
pub struct EchoExecutor;

#[async_trait]
impl NodeExecutor for EchoExecutor {
    async fn validate(&self, _element: &Element, _ctx: &ElementExecutionContext) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&self, ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult> {
        Ok(NodeResult::success(ports::SUCCESS, ctx.input.clone()))
    }
}

/// Logs the element's configured message at info level, then passes its
/// input through. `config` is treated as a plain message, not JSON.
pub struct LogExecutor {
    pub messages: HashMap<i64, String>,
}

#[async_trait]
impl NodeExecutor for LogExecutor {
    async fn validate(&self, _element: &Element, _ctx: &ElementExecutionContext) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&self, ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult> {
        let message = self
            .messages
            .get(&ctx.element_id)
            .map(String::as_str)
            .unwrap_or("");
        info!(element = %ctx.element_key, message, "log node");
        Ok(NodeResult::success(ports::SUCCESS, ctx.input.clone()))
    }
}

/// Parses `element.config` as a JSON object and merges it into the node's
/// output, on top of a copy of the input.
pub struct SetExecutor {
    pub config: HashMap<i64, Value>,
}

#[async_trait]
impl NodeExecutor for SetExecutor {
    async fn validate(&self, element: &Element, _ctx: &ElementExecutionContext) -> ValidationResult {
        if element.config.trim().is_empty() {
            return ValidationResult::ok();
        }
        match serde_json::from_str::<Value>(&element.config) {
            Ok(Value::Object(_)) => ValidationResult::ok(),
            Ok(_) => ValidationResult::invalid("set node config must be a JSON object"),
            Err(e) => ValidationResult::invalid(format!("set node config is not valid JSON: {e}")),
        }
    }

    async fn execute(&self, ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult> {
        let mut output = ctx.input.clone();
        if let Some(Value::Object(fields)) = self.config.get(&ctx.element_id) {
            for (k, v) in fields {
                output.insert(k.clone(), v.clone());
            }
        }
        Ok(NodeResult::success(ports::SUCCESS, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(id: i64, key: &str, config: &str) -> Element {
        Element {
            id,
            key: key.to_string(),
            type_name: "set".to_string(),
            disabled: false,
            is_trigger: false,
            timeout_seconds: 300,
            timeout_behavior: engine_core::model::TimeoutBehavior::Error,
            continue_on_fail: false,
            always_output_data: false,
            max_retries: 3,
            config: config.to_string(),
        }
    }

    #[tokio::test]
    async fn echo_copies_input_to_output() {
        let executor = EchoExecutor;
        let mut ctx = ElementExecutionContext::new(1, "E", "exec-1", 0, HashMap::new());
        ctx.input.insert("x".to_string(), serde_json::json!(1));
        let result = executor.execute(&mut ctx).await.unwrap();
        assert_eq!(result.output_data.get("x"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn set_merges_configured_fields_over_input() {
        let mut config = HashMap::new();
        config.insert(2, serde_json::json!({"status": "done"}));
        let executor = SetExecutor { config };
        let el = element(2, "S", r#"{"status": "done"}"#);
        let mut ctx = ElementExecutionContext::new(2, "S", "exec-1", 0, HashMap::new());
        ctx.input.insert("x".to_string(), serde_json::json!(1));

        assert!(executor.validate(&el, &ctx).await.valid);
        let result = executor.execute(&mut ctx).await.unwrap();
        assert_eq!(result.output_data.get("x"), Some(&serde_json::json!(1)));
        assert_eq!(result.output_data.get("status"), Some(&serde_json::json!("done")));
    }

    #[tokio::test]
    async fn set_rejects_non_object_config() {
        let executor = SetExecutor { config: HashMap::new() };
        let el = element(3, "S", "42");
        let ctx = ElementExecutionContext::new(3, "S", "exec-1", 0, HashMap::new());
        assert!(!executor.validate(&el, &ctx).await.valid);
    }
}
