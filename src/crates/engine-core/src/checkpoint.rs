//! State checkpoint contract.
//!
//! The engine persists and restores execution state through this trait; the
//! serialization format is implementation-defined but must be round-trip
//! stable. `engine-checkpoint` provides an in-memory backend; a production
//! deployment would back this with a database.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::memory::ExecutionMemory;

/// The stack of element keys currently pending execution, bottom-to-top —
/// the same order the orchestration loop would pop them in if nothing
/// persisted it.
pub type StackSnapshot = Vec<String>;

#[async_trait]
pub trait StateCheckpoint: Send + Sync {
    async fn save_stack(&self, thread_exec_id: &str, stack: &StackSnapshot) -> EngineResult<()>;

    async fn save_memory(&self, thread_exec_id: &str, memory: &ExecutionMemory) -> EngineResult<()>;

    /// Rehydrate the stack for `thread_exec_id`. The caller is responsible
    /// for checking every key still resolves against the current
    /// definition version; a checkpoint backend only returns what it saved.
    async fn load_stack(&self, thread_exec_id: &str) -> EngineResult<StackSnapshot>;

    async fn load_memory(&self, thread_exec_id: &str) -> EngineResult<ExecutionMemory>;

    /// Delete or tombstone the checkpoint for `thread_exec_id`.
    async fn mark_inactive(&self, thread_exec_id: &str) -> EngineResult<()>;
}
