//! Maps a node type name to a concrete executor instance.
//!
//! Built-in node types are registered at startup; third-party registrations
//! are permitted any time before the engine begins accepting executions.
//! Lookup happens once per popped element, keyed by [`crate::model::Element::type_name`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::executor::NodeExecutor;

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under `type_name`. A later registration for the
    /// same name replaces the earlier one.
    pub fn register(&mut self, type_name: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(type_name.into(), executor);
    }

    pub fn get(&self, type_name: &str) -> EngineResult<Arc<dyn NodeExecutor>> {
        self.executors
            .get(type_name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNodeType(type_name.to_string()))
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.executors.contains_key(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ElementExecutionContext;
    use crate::executor::{NodeResult, ValidationResult};
    use crate::model::Element;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct Noop;

    #[async_trait]
    impl NodeExecutor for Noop {
        async fn validate(&self, _e: &Element, _ctx: &ElementExecutionContext) -> ValidationResult {
            ValidationResult::ok()
        }

        async fn execute(&self, _ctx: &mut ElementExecutionContext) -> EngineResult<NodeResult> {
            Ok(NodeResult::success("success", Map::new()))
        }
    }

    #[test]
    fn get_missing_type_is_unknown_node_type() {
        let registry = ExecutorRegistry::new();
        let err = registry.get("http.request").unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType(t) if t == "http.request"));
    }

    #[test]
    fn register_then_get_roundtrips() {
        let mut registry = ExecutorRegistry::new();
        registry.register("noop", Arc::new(Noop));
        assert!(registry.is_registered("noop"));
        assert!(registry.get("noop").is_ok());
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry = ExecutorRegistry::new();
        registry.register("noop", Arc::new(Noop));
        registry.register("noop", Arc::new(Noop));
        assert!(registry.get("noop").is_ok());
    }
}
