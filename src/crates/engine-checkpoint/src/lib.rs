//! In-memory [`StateCheckpoint`] backend.
//!
//! Stores the pending-element stack and the execution memory for each
//! thread-execution id in a process-local map. Suitable for development,
//! tests, and single-process deployments; data does not survive a restart.
//! A production deployment backs the same trait with a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use engine_core::checkpoint::{StackSnapshot, StateCheckpoint};
use engine_core::error::{EngineError, EngineResult};
use engine_core::memory::ExecutionMemory;

#[derive(Debug, Clone, Default)]
struct CheckpointEntry {
    stack: Option<StackSnapshot>,
    memory: Option<ExecutionMemory>,
}

type CheckpointStorage = Arc<RwLock<HashMap<String, CheckpointEntry>>>;

/// Reference [`StateCheckpoint`] implementation backed by an
/// `Arc<RwLock<HashMap>>`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateCheckpoint {
    storage: CheckpointStorage,
}

impl InMemoryStateCheckpoint {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of thread-executions with a live checkpoint entry.
    pub async fn active_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Remove every checkpoint entry. Useful between tests.
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl StateCheckpoint for InMemoryStateCheckpoint {
    async fn save_stack(&self, thread_exec_id: &str, stack: &StackSnapshot) -> EngineResult<()> {
        let mut storage = self.storage.write().await;
        storage
            .entry(thread_exec_id.to_string())
            .or_default()
            .stack = Some(stack.clone());
        debug!(thread_exec_id, depth = stack.len(), "checkpointed stack");
        Ok(())
    }

    async fn save_memory(
        &self,
        thread_exec_id: &str,
        memory: &ExecutionMemory,
    ) -> EngineResult<()> {
        let mut storage = self.storage.write().await;
        storage
            .entry(thread_exec_id.to_string())
            .or_default()
            .memory = Some(memory.clone());
        debug!(thread_exec_id, "checkpointed execution memory");
        Ok(())
    }

    async fn load_stack(&self, thread_exec_id: &str) -> EngineResult<StackSnapshot> {
        self.storage
            .read()
            .await
            .get(thread_exec_id)
            .and_then(|entry| entry.stack.clone())
            .ok_or_else(|| {
                EngineError::Checkpoint(format!(
                    "no checkpointed stack for thread execution {thread_exec_id}"
                ))
            })
    }

    async fn load_memory(&self, thread_exec_id: &str) -> EngineResult<ExecutionMemory> {
        self.storage
            .read()
            .await
            .get(thread_exec_id)
            .and_then(|entry| entry.memory.clone())
            .ok_or_else(|| {
                EngineError::Checkpoint(format!(
                    "no checkpointed memory for thread execution {thread_exec_id}"
                ))
            })
    }

    async fn mark_inactive(&self, thread_exec_id: &str) -> EngineResult<()> {
        self.storage.write().await.remove(thread_exec_id);
        Ok(())
    }
}
