//! In-memory execution tracing: per-node, per-variable, and per-error
//! records, indexed by execution id, with a soft cap and FIFO-by-completion
//! purge policy.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::ThreadState;

const OUTPUT_SNAPSHOT_CAP_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct NodeExecutionTrace {
    pub element_key: String,
    pub type_name: String,
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub result: NodeTraceResult,
    pub output_port: String,
    pub output_snapshot: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTraceResult {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct VariableStateTrace {
    pub at: DateTime<Utc>,
    pub snapshot: Value,
}

#[derive(Debug, Clone)]
pub struct ErrorTrace {
    pub error_type: String,
    pub message: String,
    pub stack: Option<String>,
    pub severity: String,
    pub recovery_action: Option<String>,
    pub recovered: bool,
}

struct ExecutionTrace {
    thread_exec_id: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    final_status: Option<ThreadState>,
    nodes: Vec<NodeExecutionTrace>,
    variables: Vec<VariableStateTrace>,
    errors: Vec<ErrorTrace>,
}

/// Truncate a JSON output snapshot to the 1 KB cap, preserving validity by
/// falling back to a truncation marker rather than cutting mid-value.
pub fn truncate_snapshot(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() <= OUTPUT_SNAPSHOT_CAP_BYTES {
        rendered
    } else {
        format!(
            "{}...<truncated {} bytes>",
            &rendered[..OUTPUT_SNAPSHOT_CAP_BYTES.min(rendered.len())],
            rendered.len() - OUTPUT_SNAPSHOT_CAP_BYTES
        )
    }
}

/// An in-memory ring of execution traces with a soft cap on live traces,
/// purged FIFO by completion time when the cap is exceeded.
pub struct TracingService {
    soft_cap: usize,
    traces: Mutex<HashMap<String, ExecutionTrace>>,
    completion_order: Mutex<VecDeque<String>>,
}

impl TracingService {
    pub fn new(soft_cap: usize) -> Self {
        Self {
            soft_cap,
            traces: Mutex::new(HashMap::new()),
            completion_order: Mutex::new(VecDeque::new()),
        }
    }

    pub fn create(&self, thread_exec_id: &str) {
        self.traces.lock().unwrap().insert(
            thread_exec_id.to_string(),
            ExecutionTrace {
                thread_exec_id: thread_exec_id.to_string(),
                started_at: Utc::now(),
                completed_at: None,
                final_status: None,
                nodes: Vec::new(),
                variables: Vec::new(),
                errors: Vec::new(),
            },
        );
    }

    pub fn record_node(&self, thread_exec_id: &str, trace: NodeExecutionTrace) {
        if let Some(t) = self.traces.lock().unwrap().get_mut(thread_exec_id) {
            t.nodes.push(trace);
        }
    }

    pub fn record_variable(&self, thread_exec_id: &str, snapshot: Value) {
        if let Some(t) = self.traces.lock().unwrap().get_mut(thread_exec_id) {
            t.variables.push(VariableStateTrace {
                at: Utc::now(),
                snapshot,
            });
        }
    }

    pub fn record_error(&self, thread_exec_id: &str, error: ErrorTrace) {
        if let Some(t) = self.traces.lock().unwrap().get_mut(thread_exec_id) {
            t.errors.push(error);
        }
    }

    pub fn complete(&self, thread_exec_id: &str, status: ThreadState) {
        {
            let mut traces = self.traces.lock().unwrap();
            if let Some(t) = traces.get_mut(thread_exec_id) {
                t.completed_at = Some(Utc::now());
                t.final_status = Some(status);
            }
        }
        self.completion_order
            .lock()
            .unwrap()
            .push_back(thread_exec_id.to_string());
        self.enforce_soft_cap();
    }

    fn enforce_soft_cap(&self) {
        let mut order = self.completion_order.lock().unwrap();
        let mut traces = self.traces.lock().unwrap();
        while traces.len() > self.soft_cap {
            match order.pop_front() {
                Some(oldest) => {
                    traces.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn node_count(&self, thread_exec_id: &str) -> usize {
        self.traces
            .lock()
            .unwrap()
            .get(thread_exec_id)
            .map(|t| t.nodes.len())
            .unwrap_or(0)
    }

    /// Node traces for `thread_exec_id`, limited to the most recent `limit`.
    pub fn get_by_execution(&self, thread_exec_id: &str, limit: usize) -> Vec<NodeExecutionTrace> {
        self.traces
            .lock()
            .unwrap()
            .get(thread_exec_id)
            .map(|t| {
                let start = t.nodes.len().saturating_sub(limit);
                t.nodes[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn get_by_id(&self, thread_exec_id: &str) -> Option<String> {
        self.traces
            .lock()
            .unwrap()
            .get(thread_exec_id)
            .map(|t| t.thread_exec_id.clone())
    }

    pub fn delete_by_id(&self, thread_exec_id: &str) {
        self.traces.lock().unwrap().remove(thread_exec_id);
    }

    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) {
        self.traces
            .lock()
            .unwrap()
            .retain(|_, t| t.completed_at.map(|c| c >= cutoff).unwrap_or(true));
    }
}

impl Default for TracingService {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_then_record_then_complete() {
        let service = TracingService::new(10);
        service.create("exec-1");
        service.record_node(
            "exec-1",
            NodeExecutionTrace {
                element_key: "A".to_string(),
                type_name: "noop".to_string(),
                sequence: 1,
                started_at: Utc::now(),
                completed_at: Utc::now(),
                duration_ms: 1,
                result: NodeTraceResult::Success,
                output_port: "success".to_string(),
                output_snapshot: "{}".to_string(),
                error_message: None,
            },
        );
        assert_eq!(service.node_count("exec-1"), 1);
        service.complete("exec-1", ThreadState::Completed);
        assert!(service.get_by_id("exec-1").is_some());
    }

    #[test]
    fn soft_cap_evicts_oldest_completed_first() {
        let service = TracingService::new(2);
        for i in 0..3 {
            let id = format!("exec-{i}");
            service.create(&id);
            service.complete(&id, ThreadState::Completed);
        }
        // exec-0 was the first completed, so it should be evicted first.
        assert!(service.get_by_id("exec-0").is_none());
        assert!(service.get_by_id("exec-1").is_some());
        assert!(service.get_by_id("exec-2").is_some());
    }

    #[test]
    fn truncate_snapshot_under_cap_is_unchanged() {
        let small = json!({"x": 1});
        assert_eq!(truncate_snapshot(&small), small.to_string());
    }

    #[test]
    fn truncate_snapshot_over_cap_is_marked() {
        let big = json!({"blob": "x".repeat(2000)});
        let snapshot = truncate_snapshot(&big);
        assert!(snapshot.contains("truncated"));
        assert!(snapshot.len() < big.to_string().len());
    }
}
