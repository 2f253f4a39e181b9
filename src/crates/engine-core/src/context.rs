//! Per-invocation and per-execution context types.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Status of a single element invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Idle,
    Running,
    Success,
    Failed,
    Skipped,
    Waiting,
    Retrying,
    Timeout,
}

/// Status of a whole thread execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Idle,
    Queued,
    Running,
    Paused,
    Waiting,
    Completed,
    CompletedWithWarnings,
    Failed,
    Cancelled,
    TimedOut,
}

impl ThreadState {
    /// Wire-stable execution-status id.
    pub fn status_id(self) -> i32 {
        match self {
            ThreadState::Running
            | ThreadState::Idle
            | ThreadState::Queued
            | ThreadState::Waiting => 1,
            ThreadState::Paused => 2,
            ThreadState::Completed | ThreadState::CompletedWithWarnings => 3,
            ThreadState::Failed | ThreadState::TimedOut => 4,
            ThreadState::Cancelled => 5,
        }
    }
}

/// Mutable, per-invocation context for one popped element.
#[derive(Debug, Clone)]
pub struct ElementExecutionContext {
    pub element_id: i64,
    pub element_key: String,
    pub thread_exec_id: String,
    pub execution_order: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub input: HashMap<String, Value>,
    pub output: HashMap<String, Value>,
    pub error_output: Option<Value>,
    pub status: NodeStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub local_memory: HashMap<String, Value>,
}

impl ElementExecutionContext {
    pub fn new(
        element_id: i64,
        element_key: impl Into<String>,
        thread_exec_id: impl Into<String>,
        execution_order: u64,
        input: HashMap<String, Value>,
    ) -> Self {
        Self {
            element_id,
            element_key: element_key.into(),
            thread_exec_id: thread_exec_id.into(),
            execution_order,
            started_at: None,
            stopped_at: None,
            input,
            output: HashMap::new(),
            error_output: None,
            status: NodeStatus::Idle,
            error_message: None,
            retry_count: 0,
            local_memory: HashMap::new(),
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => Some((stop - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Mutable, per-execution context for one thread execution.
#[derive(Debug, Clone)]
pub struct ThreadExecutionContext {
    pub thread_id: i64,
    pub version_id: i64,
    pub thread_exec_id: String,
    pub started_at: DateTime<Utc>,
    pub input: HashMap<String, Value>,
    pub output: HashMap<String, Value>,
    pub state: ThreadState,
    pub completed_node_count: u64,
    pub total_node_count: u64,
    pub elements: Vec<ElementExecutionContext>,
}

impl ThreadExecutionContext {
    pub fn new(
        thread_id: i64,
        version_id: i64,
        thread_exec_id: impl Into<String>,
        input: HashMap<String, Value>,
        total_node_count: u64,
    ) -> Self {
        Self {
            thread_id,
            version_id,
            thread_exec_id: thread_exec_id.into(),
            started_at: Utc::now(),
            input,
            output: HashMap::new(),
            state: ThreadState::Running,
            completed_node_count: 0,
            total_node_count,
            elements: Vec::new(),
        }
    }
}
