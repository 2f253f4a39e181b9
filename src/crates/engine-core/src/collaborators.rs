//! Collaborator contracts the engine depends on but does not implement
//! itself: loading a thread definition, and persisting execution state.
//! Each trait ships an in-memory implementation sufficient for tests and the
//! demo CLI; a real deployment backs these with a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::context::ThreadExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::model::ThreadDefinition;

/// Resolves a thread definition version id to its definition. Cooperative
/// cancellation is threaded through so a pending load can be abandoned if
/// the caller cancels before it resolves.
#[async_trait]
pub trait DefinitionLoader: Send + Sync {
    async fn load_process_thread(
        &self,
        version_id: i64,
        cancellation: &CancellationToken,
    ) -> EngineResult<ThreadDefinition>;
}

/// An in-memory loader keyed by version id, sufficient for tests and the
/// demo CLI. A real deployment resolves this against a definition store.
#[derive(Default)]
pub struct InMemoryDefinitionLoader {
    definitions: Mutex<HashMap<i64, ThreadDefinition>>,
}

impl InMemoryDefinitionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, definition: ThreadDefinition) {
        self.definitions
            .lock()
            .unwrap()
            .insert(definition.version_id, definition);
    }
}

#[async_trait]
impl DefinitionLoader for InMemoryDefinitionLoader {
    async fn load_process_thread(
        &self,
        version_id: i64,
        cancellation: &CancellationToken,
    ) -> EngineResult<ThreadDefinition> {
        if cancellation.is_cancelled() {
            return Err(EngineError::DefinitionLoad {
                version_id,
                message: "cancelled before definition load completed".to_string(),
            });
        }
        self.definitions
            .lock()
            .unwrap()
            .get(&version_id)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionLoad {
                version_id,
                message: "no definition registered for this version".to_string(),
            })
    }
}

/// Persists the execution context a process execution is tracked under.
/// Distinct from [`crate::checkpoint::StateCheckpoint`]: this is the
/// outward-facing execution record lookup (e.g. for a status API), not the
/// stack/memory snapshot used to resume a paused execution.
#[async_trait]
pub trait ThreadExecutionPersistence: Send + Sync {
    async fn get_by_process_execution(
        &self,
        thread_exec_id: &str,
    ) -> EngineResult<Option<ThreadExecutionContext>>;

    async fn update(&self, ctx: &ThreadExecutionContext) -> EngineResult<()>;
}

#[derive(Default)]
pub struct InMemoryThreadExecutionPersistence {
    contexts: Mutex<HashMap<String, ThreadExecutionContext>>,
}

impl InMemoryThreadExecutionPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadExecutionPersistence for InMemoryThreadExecutionPersistence {
    async fn get_by_process_execution(
        &self,
        thread_exec_id: &str,
    ) -> EngineResult<Option<ThreadExecutionContext>> {
        Ok(self
            .contexts
            .lock()
            .unwrap()
            .get(thread_exec_id)
            .cloned())
    }

    async fn update(&self, ctx: &ThreadExecutionContext) -> EngineResult<()> {
        self.contexts
            .lock()
            .unwrap()
            .insert(ctx.thread_exec_id.clone(), ctx.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn sample_definition() -> ThreadDefinition {
        ThreadDefinition {
            id: 1,
            version_id: 7,
            name: "sample".to_string(),
            enabled: true,
            elements: Vec::new(),
            connections: Vec::new(),
        }
    }

    #[tokio::test]
    async fn loader_returns_registered_definition() {
        let loader = InMemoryDefinitionLoader::new();
        loader.insert(sample_definition());
        let token = CancellationToken::new();
        let def = loader.load_process_thread(7, &token).await.unwrap();
        assert_eq!(def.name, "sample");
    }

    #[tokio::test]
    async fn loader_errors_on_unknown_version() {
        let loader = InMemoryDefinitionLoader::new();
        let token = CancellationToken::new();
        let err = loader.load_process_thread(99, &token).await.unwrap_err();
        assert!(matches!(err, EngineError::DefinitionLoad { version_id: 99, .. }));
    }

    #[tokio::test]
    async fn loader_rejects_cancelled_requests() {
        let loader = InMemoryDefinitionLoader::new();
        loader.insert(sample_definition());
        let token = CancellationToken::new();
        token.cancel();
        let err = loader.load_process_thread(7, &token).await.unwrap_err();
        assert!(matches!(err, EngineError::DefinitionLoad { .. }));
    }

    #[tokio::test]
    async fn persistence_roundtrips_by_thread_exec_id() {
        let store = InMemoryThreadExecutionPersistence::new();
        let ctx = ThreadExecutionContext::new(1, 7, "exec-1", Map::new(), 2);
        store.update(&ctx).await.unwrap();
        let fetched = store
            .get_by_process_execution("exec-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.thread_exec_id, "exec-1");
    }

    #[tokio::test]
    async fn persistence_missing_execution_is_none() {
        let store = InMemoryThreadExecutionPersistence::new();
        assert!(store
            .get_by_process_execution("missing")
            .await
            .unwrap()
            .is_none());
    }
}
