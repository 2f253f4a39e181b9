//! The execution record emitted at the end of a thread execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ThreadExecutionContext;

/// Wire-stable execution-mode id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExecutionMode {
    Manual = 0,
    Webhook = 1,
    Scheduled = 2,
    Event = 3,
    Test = 4,
    SubProcess = 5,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub thread_id: i64,
    pub version_id: i64,
    pub thread_exec_id: String,
    pub execution_mode_id: i32,
    pub execution_status_id: i32,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub input: Value,
    pub output: Value,
    pub total_node_count: u64,
    pub completed_node_count: u64,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    pub fn from_context(
        ctx: &ThreadExecutionContext,
        execution_mode: ExecutionMode,
        stopped_at: DateTime<Utc>,
        error_message: Option<String>,
    ) -> Self {
        let duration_ms = (stopped_at - ctx.started_at).num_milliseconds();
        Self {
            thread_id: ctx.thread_id,
            version_id: ctx.version_id,
            thread_exec_id: ctx.thread_exec_id.clone(),
            execution_mode_id: execution_mode as i32,
            execution_status_id: ctx.state.status_id(),
            started_at: ctx.started_at,
            stopped_at,
            duration_ms,
            input: serde_json::to_value(&ctx.input).unwrap_or(Value::Null),
            output: serde_json::to_value(&ctx.output).unwrap_or(Value::Null),
            total_node_count: ctx.total_node_count,
            completed_node_count: ctx.completed_node_count,
            error_message,
        }
    }
}
