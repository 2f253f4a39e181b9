//! Execution memory — the mutable state threaded through one thread
//! execution.
//!
//! `ExecutionMemory` owns five independent pieces of state, each with its
//! own access pattern:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ ExecutionMemory                                             │
//! │                                                              │
//! │  scopes: arena of Scope { Global, Thread, Node, Loop, Try }  │
//! │     Global ← preloaded from input data                      │
//! │       └─ Thread ← ... ← current scope (walked on Get)       │
//! │                                                              │
//! │  node_outputs: flat key → last output value                 │
//! │  cache:        flat key → value, owned by executors          │
//! │                                                              │
//! │  loop_stack: Vec<(node key, iteration count)>                │
//! │  break / continue: consumed once per pop, by the loop        │
//! │                                                              │
//! │  try_stack: Vec<TryFrame { catches, finally, exception }>    │
//! │  current_exception: the exception currently being handled    │
//! │                                                              │
//! │  parallel: fork/join lane state                              │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scope chain is modeled as an arena (`Vec<Scope>`) with parent
//! pointers as indices rather than a linked structure, so a child scope
//! never holds a reference back to its parent — avoiding the ownership
//! cycle a naive `Rc<RefCell<..>>` chain would need.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};

/// The kind of a variable scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeType {
    Global,
    Thread,
    Node,
    Loop,
    TryCatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Scope {
    scope_type: ScopeType,
    parent: Option<usize>,
    local: HashMap<String, Value>,
}

/// One entered try-block: its ordered catch handlers, optional finally
/// element, and the bookkeeping needed to guarantee finally runs exactly
/// once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TryFrame {
    pub try_key: String,
    pub catch_handlers: Vec<CatchHandler>,
    pub finally_key: Option<String>,
    pub finally_executed: bool,
    pub exception_occurred: bool,
    pub last_exception: Option<Value>,
}

/// A single catch handler: the element key to route to, and optionally the
/// exception type it matches. `None` means catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchHandler {
    pub catch_key: String,
    pub exception_type: Option<String>,
}

/// Fork/join state for parallel lanes. `active` is set by a fork element and
/// cleared by the matching join; lane statuses and outputs accumulate until
/// the join consumes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelState {
    pub active: bool,
    lane_status: HashMap<String, bool>,
    lane_outputs: HashMap<String, Value>,
}

impl ParallelState {
    pub fn lane_outputs(&self) -> &HashMap<String, Value> {
        &self.lane_outputs
    }

    pub fn all_lanes_complete(&self) -> bool {
        !self.lane_status.is_empty() && self.lane_status.values().all(|done| *done)
    }
}

/// The per-execution mutable state: variable scopes, node outputs, cache,
/// loop control, the try/catch/finally stack, and parallel-lane state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMemory {
    scopes: Vec<Scope>,
    current_scope: usize,
    node_outputs: HashMap<String, Value>,
    cache: HashMap<String, Value>,
    loop_break: bool,
    loop_continue: bool,
    loop_stack: Vec<(String, u64)>,
    try_stack: Vec<TryFrame>,
    current_exception: Option<Value>,
    parallel: ParallelState,
}

impl ExecutionMemory {
    /// Create a fresh memory with the global scope preloaded from the
    /// execution's input data.
    pub fn new(input_data: HashMap<String, Value>) -> Self {
        let global = Scope {
            scope_type: ScopeType::Global,
            parent: None,
            local: input_data,
        };
        Self {
            scopes: vec![global],
            current_scope: 0,
            node_outputs: HashMap::new(),
            cache: HashMap::new(),
            loop_break: false,
            loop_continue: false,
            loop_stack: Vec::new(),
            try_stack: Vec::new(),
            current_exception: None,
            parallel: ParallelState::default(),
        }
    }

    // --- Scoped variable access -------------------------------------------------

    /// Walk the scope chain from the current scope up to global, returning
    /// the first value found for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut idx = Some(self.current_scope);
        while let Some(i) = idx {
            let scope = &self.scopes[i];
            if let Some(v) = scope.local.get(key) {
                return Some(v);
            }
            idx = scope.parent;
        }
        None
    }

    /// Update `key` in the nearest scope (walking up from current) that
    /// already contains it; otherwise create it in the current scope. Null
    /// values are rejected.
    pub fn set(&mut self, key: &str, value: Value) -> EngineResult<()> {
        if value.is_null() {
            return Err(EngineError::Validation {
                element: "memory".to_string(),
                message: format!("cannot set null value for key '{key}'"),
            });
        }
        let mut idx = Some(self.current_scope);
        while let Some(i) = idx {
            if self.scopes[i].local.contains_key(key) {
                self.scopes[i].local.insert(key.to_string(), value);
                return Ok(());
            }
            idx = self.scopes[i].parent;
        }
        self.scopes[self.current_scope]
            .local
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Create or overwrite `key` only in the current (top) scope, bypassing
    /// the inheritance walk that [`ExecutionMemory::set`] performs.
    pub fn set_local(&mut self, key: &str, value: Value) -> EngineResult<()> {
        if value.is_null() {
            return Err(EngineError::Validation {
                element: "memory".to_string(),
                message: format!("cannot set null value for key '{key}'"),
            });
        }
        self.scopes[self.current_scope]
            .local
            .insert(key.to_string(), value);
        Ok(())
    }

    // --- Scope lifecycle ----------------------------------------------------

    /// Push a new scope with the current scope as its parent.
    pub fn enter(&mut self, scope_type: ScopeType) {
        self.scopes.push(Scope {
            scope_type,
            parent: Some(self.current_scope),
            local: HashMap::new(),
        });
        self.current_scope = self.scopes.len() - 1;
    }

    /// Pop the current scope and make its parent current. Returns `false`
    /// without popping if already at the global scope (parent is `None`).
    pub fn exit(&mut self) -> bool {
        match self.scopes[self.current_scope].parent {
            Some(parent) => {
                self.current_scope = parent;
                true
            }
            None => false,
        }
    }

    pub fn current_scope_type(&self) -> ScopeType {
        self.scopes[self.current_scope].scope_type
    }

    /// Flatten the scope chain from global down to current into a single
    /// map, child entries overriding parent ones. Used by the router and
    /// expression evaluator, which see variables as a flat namespace.
    pub fn variables_snapshot(&self) -> HashMap<String, Value> {
        let mut chain = Vec::new();
        let mut idx = Some(self.current_scope);
        while let Some(i) = idx {
            chain.push(i);
            idx = self.scopes[i].parent;
        }
        let mut flat = HashMap::new();
        for i in chain.into_iter().rev() {
            flat.extend(self.scopes[i].local.clone());
        }
        flat
    }

    // --- Node outputs / cache -------------------------------------------------

    pub fn set_node_output(&mut self, key: impl Into<String>, value: Value) {
        self.node_outputs.insert(key.into(), value);
    }

    pub fn node_output(&self, key: &str) -> Option<&Value> {
        self.node_outputs.get(key)
    }

    pub fn node_outputs(&self) -> &HashMap<String, Value> {
        &self.node_outputs
    }

    pub fn cache_set(&mut self, key: impl Into<String>, value: Value) {
        self.cache.insert(key.into(), value);
    }

    pub fn cache_get(&self, key: &str) -> Option<&Value> {
        self.cache.get(key)
    }

    // --- Loop control ---------------------------------------------------------

    pub fn enter_loop(&mut self, key: impl Into<String>) {
        self.loop_stack.push((key.into(), 0));
    }

    pub fn exit_loop(&mut self) -> Option<(String, u64)> {
        self.loop_stack.pop()
    }

    /// Increment the iteration counter of the innermost loop frame. A no-op
    /// if no loop is active.
    pub fn increment(&mut self) {
        if let Some((_, count)) = self.loop_stack.last_mut() {
            *count += 1;
        }
    }

    pub fn current_loop(&self) -> Option<&(String, u64)> {
        self.loop_stack.last()
    }

    pub fn set_break(&mut self) {
        self.loop_break = true;
    }

    pub fn set_continue(&mut self) {
        self.loop_continue = true;
    }

    pub fn is_break(&self) -> bool {
        self.loop_break
    }

    pub fn is_continue(&self) -> bool {
        self.loop_continue
    }

    /// Consume both loop signals. The orchestration loop calls this exactly
    /// once per pop, before the next element is popped.
    pub fn clear_signals(&mut self) {
        self.loop_break = false;
        self.loop_continue = false;
    }

    // --- Try/catch/finally ------------------------------------------------------

    pub fn enter_try(&mut self, try_key: impl Into<String>) {
        self.try_stack.push(TryFrame {
            try_key: try_key.into(),
            catch_handlers: Vec::new(),
            finally_key: None,
            finally_executed: false,
            exception_occurred: false,
            last_exception: None,
        });
    }

    pub fn add_catch(&mut self, catch_key: impl Into<String>, exception_type: Option<String>) {
        if let Some(frame) = self.try_stack.last_mut() {
            frame.catch_handlers.push(CatchHandler {
                catch_key: catch_key.into(),
                exception_type,
            });
        }
    }

    pub fn set_finally(&mut self, finally_key: impl Into<String>) {
        if let Some(frame) = self.try_stack.last_mut() {
            frame.finally_key = Some(finally_key.into());
        }
    }

    pub fn current_try(&self) -> Option<&TryFrame> {
        self.try_stack.last()
    }

    pub fn current_try_mut(&mut self) -> Option<&mut TryFrame> {
        self.try_stack.last_mut()
    }

    pub fn exit_try(&mut self) -> Option<TryFrame> {
        self.try_stack.pop()
    }

    pub fn set_current_exception(&mut self, exception: Value) {
        self.current_exception = Some(exception);
    }

    pub fn current_exception(&self) -> Option<&Value> {
        self.current_exception.as_ref()
    }

    pub fn clear_current_exception(&mut self) {
        self.current_exception = None;
    }

    /// Scan the current try frame's catch handlers, in registration order,
    /// for the first handler whose `exception_type` matches `error_type`
    /// directly or any entry of `ancestry` (the type's simple/fully-qualified
    /// ancestry, most specific first), or is `None` (catch-all). Ties are
    /// broken by registration order — the first match wins.
    pub fn find_catch_handler(&self, error_type: &str, ancestry: &[String]) -> Option<String> {
        let frame = self.try_stack.last()?;
        for handler in &frame.catch_handlers {
            match &handler.exception_type {
                None => return Some(handler.catch_key.clone()),
                Some(t) if t == error_type || ancestry.iter().any(|a| a == t) => {
                    return Some(handler.catch_key.clone());
                }
                Some(_) => continue,
            }
        }
        None
    }

    // --- Parallel lanes ----------------------------------------------------------

    pub fn start_parallel(&mut self) {
        self.parallel = ParallelState {
            active: true,
            ..Default::default()
        };
    }

    pub fn is_parallel_active(&self) -> bool {
        self.parallel.active
    }

    pub fn set_lane_status(&mut self, lane_id: impl Into<String>, completed: bool) {
        self.parallel.lane_status.insert(lane_id.into(), completed);
    }

    pub fn set_lane_output(&mut self, lane_id: impl Into<String>, output: Value) {
        self.parallel.lane_outputs.insert(lane_id.into(), output);
    }

    pub fn lane_outputs(&self) -> &HashMap<String, Value> {
        self.parallel.lane_outputs()
    }

    pub fn all_lanes_complete(&self) -> bool {
        self.parallel.all_lanes_complete()
    }

    pub fn clear_parallel(&mut self) {
        self.parallel = ParallelState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> ExecutionMemory {
        let mut input = HashMap::new();
        input.insert("v".to_string(), json!(15));
        ExecutionMemory::new(input)
    }

    #[test]
    fn get_reads_from_global_scope() {
        let mem = seeded();
        assert_eq!(mem.get("v"), Some(&json!(15)));
        assert_eq!(mem.get("missing"), None);
    }

    #[test]
    fn set_updates_nearest_existing_scope() {
        let mut mem = seeded();
        mem.enter(ScopeType::Node);
        mem.set("v", json!(99)).unwrap();
        // updated in global (nearest scope containing the key), visible from the child
        assert_eq!(mem.get("v"), Some(&json!(99)));
        mem.exit();
        assert_eq!(mem.get("v"), Some(&json!(99)));
    }

    #[test]
    fn set_creates_in_current_scope_when_absent_everywhere() {
        let mut mem = seeded();
        mem.enter(ScopeType::Node);
        mem.set("fresh", json!("x")).unwrap();
        mem.exit();
        // created in the Node scope, which is now gone — not visible from global
        assert_eq!(mem.get("fresh"), None);
    }

    #[test]
    fn set_local_bypasses_inheritance() {
        let mut mem = seeded();
        mem.enter(ScopeType::Node);
        mem.set_local("v", json!("shadowed")).unwrap();
        assert_eq!(mem.get("v"), Some(&json!("shadowed")));
        mem.exit();
        // global untouched
        assert_eq!(mem.get("v"), Some(&json!(15)));
    }

    #[test]
    fn set_rejects_null() {
        let mut mem = seeded();
        assert!(mem.set("v", Value::Null).is_err());
    }

    #[test]
    fn exit_at_global_is_noop() {
        let mut mem = seeded();
        assert!(!mem.exit());
        assert_eq!(mem.current_scope_type(), ScopeType::Global);
    }

    #[test]
    fn loop_signals_consumed_once() {
        let mut mem = seeded();
        mem.enter_loop("L");
        mem.increment();
        mem.increment();
        assert_eq!(mem.current_loop(), Some(&("L".to_string(), 2)));
        mem.set_break();
        assert!(mem.is_break());
        mem.clear_signals();
        assert!(!mem.is_break());
    }

    #[test]
    fn find_catch_handler_prefers_typed_match_over_catch_all_order() {
        let mut mem = seeded();
        mem.enter_try("Try");
        mem.add_catch("CatchAll", None);
        mem.add_catch("CatchTimeout", Some("TimeoutException".to_string()));
        // registration order: catch-all registered first, so it wins even
        // though a more specific handler exists later — first match in
        // registration order, not most-specific-first.
        let found = mem.find_catch_handler("TimeoutException", &[]);
        assert_eq!(found, Some("CatchAll".to_string()));
    }

    #[test]
    fn find_catch_handler_matches_ancestry() {
        let mut mem = seeded();
        mem.enter_try("Try");
        mem.add_catch("CatchIo", Some("IoException".to_string()));
        mem.add_catch("CatchTimeout", Some("TimeoutException".to_string()));
        let ancestry = vec!["TimeoutException".to_string(), "ExecutorError".to_string()];
        let found = mem.find_catch_handler("SpecificTimeout", &ancestry);
        assert_eq!(found, Some("CatchTimeout".to_string()));
    }

    #[test]
    fn find_catch_handler_none_when_no_match() {
        let mut mem = seeded();
        mem.enter_try("Try");
        mem.add_catch("CatchIo", Some("IoException".to_string()));
        assert_eq!(mem.find_catch_handler("TimeoutException", &[]), None);
    }

    #[test]
    fn variables_snapshot_merges_scope_chain_child_wins() {
        let mut mem = seeded();
        mem.enter(ScopeType::Node);
        mem.set_local("extra", json!("local")).unwrap();
        let snapshot = mem.variables_snapshot();
        assert_eq!(snapshot.get("v"), Some(&json!(15)));
        assert_eq!(snapshot.get("extra"), Some(&json!("local")));
    }

    #[test]
    fn parallel_lanes_join_when_all_complete() {
        let mut mem = seeded();
        mem.start_parallel();
        mem.set_lane_status("lane_a", false);
        mem.set_lane_status("lane_b", false);
        assert!(!mem.all_lanes_complete());
        mem.set_lane_status("lane_a", true);
        mem.set_lane_status("lane_b", true);
        assert!(mem.all_lanes_complete());
        mem.set_lane_output("lane_a", json!({"x": 1}));
        assert_eq!(mem.lane_outputs().get("lane_a"), Some(&json!({"x": 1})));
        mem.clear_parallel();
        assert!(!mem.is_parallel_active());
    }
}
