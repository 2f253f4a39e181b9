//! The orchestration loop and the five entry points the rest of the system
//! calls through: `ExecuteProcess`, `ExecuteProcessThread`, `PauseExecution`,
//! `ResumeExecution`, `CancelExecution`.
//!
//! The active-execution table, the pause-signal table, and the per-root
//! sub-workflow nesting-depth tracker all live on an `Engine` value rather
//! than as ambient statics. Every orchestration operation takes `&self` on
//! an `Engine`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::checkpoint::StateCheckpoint;
use crate::collaborators::{DefinitionLoader, ThreadExecutionPersistence};
use crate::config::EngineConfig;
use crate::context::{ElementExecutionContext, NodeStatus, ThreadExecutionContext, ThreadState};
use crate::element_executor::{execute_element, ElementOutcome};
use crate::error::{EngineError, EngineResult};
use crate::error_handler::{is_fatal_baseline, ErrorContext, ErrorHandler, ErrorResult};
use crate::events::{EventPublisher, WorkflowEvent};
use crate::executor::{ports, NodeResult};
use crate::memory::ExecutionMemory;
use crate::model::ThreadDefinition;
use crate::record::{ExecutionMode, ExecutionRecord};
use crate::registry::ExecutorRegistry;
use crate::retry::RetryPolicy;
use crate::router::{ExpressionEvaluator, Router};
use crate::trace::{truncate_snapshot, ErrorTrace, NodeExecutionTrace, NodeTraceResult, TracingService};

/// Per-execution bookkeeping the active-execution table holds while a loop
/// owns `ExecutionMemory`. Gone once the loop pauses, cancels, or finishes.
struct ActiveExecution {
    cancellation: CancellationToken,
    pause_requested: Arc<AtomicBool>,
}

/// Owns every piece of process-wide mutable state the orchestration loop
/// needs: the executor registry, its collaborators, and the active-
/// execution / nesting-depth tables.
pub struct Engine {
    registry: Arc<ExecutorRegistry>,
    loader: Arc<dyn DefinitionLoader>,
    checkpoint: Arc<dyn StateCheckpoint>,
    persistence: Arc<dyn ThreadExecutionPersistence>,
    events: Arc<EventPublisher>,
    tracing: Arc<TracingService>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    retry_policy: RetryPolicy,
    config: EngineConfig,
    active: Mutex<HashMap<String, ActiveExecution>>,
    nesting_depth: Mutex<HashMap<String, u32>>,
}

impl Engine {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        loader: Arc<dyn DefinitionLoader>,
        checkpoint: Arc<dyn StateCheckpoint>,
        persistence: Arc<dyn ThreadExecutionPersistence>,
        events: Arc<EventPublisher>,
        tracing: Arc<TracingService>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            loader,
            checkpoint,
            persistence,
            events,
            tracing,
            evaluator,
            retry_policy: RetryPolicy::default_action(),
            config,
            active: Mutex::new(HashMap::new()),
            nesting_depth: Mutex::new(HashMap::new()),
        }
    }

    // --- Entry point: ExecuteProcess ------------------------------------------

    /// Starts a brand-new thread execution, minting its thread-execution id.
    pub async fn execute_process(
        &self,
        thread_id: i64,
        version_id: i64,
        input: HashMap<String, Value>,
        mode: ExecutionMode,
    ) -> EngineResult<ExecutionRecord> {
        let thread_exec_id = Uuid::new_v4().to_string();
        self.execute_process_thread(thread_exec_id, thread_id, version_id, input, mode)
            .await
    }

    // --- Entry point: ExecuteProcessThread ------------------------------------

    /// Runs the orchestration loop for an already-identified thread
    /// execution, from its trigger elements.
    pub async fn execute_process_thread(
        &self,
        thread_exec_id: String,
        thread_id: i64,
        version_id: i64,
        input: HashMap<String, Value>,
        mode: ExecutionMode,
    ) -> EngineResult<ExecutionRecord> {
        let cancellation = CancellationToken::new();
        let definition = self
            .loader
            .load_process_thread(version_id, &cancellation)
            .await?;

        let stack: Vec<String> = definition
            .trigger_elements()
            .into_iter()
            .map(|e| e.key.clone())
            .collect();

        let total = definition.elements.len() as u64;
        let memory = ExecutionMemory::new(input.clone());
        let ctx = ThreadExecutionContext::new(thread_id, version_id, thread_exec_id.clone(), input, total);

        self.register_active(&thread_exec_id, cancellation.clone()).await;
        self.tracing.create(&thread_exec_id);
        self.events.publish(WorkflowEvent::workflow_starting(&ctx)).await;
        info!(thread_exec_id = %thread_exec_id, thread_id, version_id, "thread execution starting");

        self.run_loop(&definition, stack, memory, ctx, cancellation, mode).await
    }

    // --- Entry point: PauseExecution ------------------------------------------

    /// Requests a pause; observed at the top of the loop's next iteration.
    pub async fn pause_execution(&self, thread_exec_id: &str) -> EngineResult<()> {
        let active = self.active.lock().await;
        let handle = active
            .get(thread_exec_id)
            .ok_or_else(|| EngineError::NoSuchExecution(thread_exec_id.to_string()))?;
        handle.pause_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    // --- Entry point: ResumeExecution -----------------------------------------

    /// Reloads a paused execution's checkpoint and re-enters the loop.
    pub async fn resume_execution(
        &self,
        thread_exec_id: &str,
        thread_id: i64,
        version_id: i64,
        mode: ExecutionMode,
    ) -> EngineResult<ExecutionRecord> {
        let cancellation = CancellationToken::new();
        let definition = self
            .loader
            .load_process_thread(version_id, &cancellation)
            .await?;

        let stack_keys = self.checkpoint.load_stack(thread_exec_id).await?;
        for key in &stack_keys {
            if definition.element_by_key(key).is_none() {
                return Err(EngineError::StateRestore {
                    thread_exec_id: thread_exec_id.to_string(),
                    message: format!("checkpointed element key '{key}' no longer exists"),
                });
            }
        }
        let memory = self.checkpoint.load_memory(thread_exec_id).await?;

        let input = memory.variables_snapshot();
        let total = definition.elements.len() as u64;
        let mut ctx = ThreadExecutionContext::new(
            thread_id,
            version_id,
            thread_exec_id.to_string(),
            input,
            total,
        );
        ctx.state = ThreadState::Running;

        self.register_active(thread_exec_id, cancellation.clone()).await;
        debug!(thread_exec_id, "resuming execution");

        self.run_loop(&definition, stack_keys, memory, ctx, cancellation, mode)
            .await
    }

    // --- Entry point: CancelExecution -----------------------------------------

    pub async fn cancel_execution(&self, thread_exec_id: &str) -> EngineResult<()> {
        let mut active = self.active.lock().await;
        let handle = active
            .remove(thread_exec_id)
            .ok_or_else(|| EngineError::NoSuchExecution(thread_exec_id.to_string()))?;
        handle.cancellation.cancel();
        self.checkpoint.mark_inactive(thread_exec_id).await?;
        Ok(())
    }

    async fn register_active(&self, thread_exec_id: &str, cancellation: CancellationToken) {
        self.active.lock().await.insert(
            thread_exec_id.to_string(),
            ActiveExecution {
                cancellation,
                pause_requested: Arc::new(AtomicBool::new(false)),
            },
        );
    }

    async fn pause_requested(&self, thread_exec_id: &str) -> Option<Arc<AtomicBool>> {
        self.active
            .lock()
            .await
            .get(thread_exec_id)
            .map(|h| h.pause_requested.clone())
    }

    async fn unregister_active(&self, thread_exec_id: &str) {
        self.active.lock().await.remove(thread_exec_id);
    }

    // --- The loop itself -------------------------------------------------------

    async fn run_loop(
        &self,
        definition: &ThreadDefinition,
        mut stack: Vec<String>,
        mut memory: ExecutionMemory,
        mut ctx: ThreadExecutionContext,
        cancellation: CancellationToken,
        mode: ExecutionMode,
    ) -> EngineResult<ExecutionRecord> {
        let router = Router::new(self.evaluator.as_ref());
        let error_handler = ErrorHandler::new(&is_fatal_baseline);
        let thread_exec_id = ctx.thread_exec_id.clone();
        let mut fatal_error: Option<String> = None;

        loop {
            if cancellation.is_cancelled() {
                ctx.state = ThreadState::Cancelled;
                break;
            }
            if let Some(flag) = self.pause_requested(&thread_exec_id).await {
                if flag.swap(false, Ordering::SeqCst) {
                    let keys = stack.clone();
                    self.checkpoint.save_stack(&thread_exec_id, &keys).await?;
                    self.checkpoint.save_memory(&thread_exec_id, &memory).await?;
                    ctx.state = ThreadState::Paused;
                    break;
                }
            }

            let Some(key) = stack.pop() else {
                break;
            };

            let Some(element) = definition.element_by_key(&key) else {
                continue;
            };
            if element.disabled {
                continue;
            }
            if element.type_name == "try" {
                setup_try_frame(&mut memory, element);
            }

            let mut elem_ctx = ElementExecutionContext::new(
                element.id,
                element.key.clone(),
                thread_exec_id.clone(),
                ctx.completed_node_count + 1,
                memory.variables_snapshot(),
            );
            self.events.publish(WorkflowEvent::node_executing(&elem_ctx)).await;

            let executor = match self.registry.get(&element.type_name) {
                Ok(executor) => executor,
                Err(err) => {
                    self.events.publish(WorkflowEvent::error(&elem_ctx, &err)).await;
                    match self
                        .dispatch_exception(&mut memory, &mut stack, "UnknownNodeType", &err.to_string())
                    {
                        ExceptionDispatch::Handled => {
                            ctx.completed_node_count += 1;
                            continue;
                        }
                        ExceptionDispatch::Fatal(message) => {
                            ctx.state = ThreadState::Failed;
                            fatal_error = Some(
                                EngineError::Fatal {
                                    element: element.key.clone(),
                                    message,
                                }
                                .to_string(),
                            );
                            break;
                        }
                    }
                }
            };

            let outcome = execute_element(executor.as_ref(), element, &mut elem_ctx, &cancellation).await;

            match outcome {
                ElementOutcome::CallerCancelled => {
                    ctx.state = ThreadState::Cancelled;
                    ctx.elements.push(elem_ctx);
                    break;
                }
                ElementOutcome::RetryRequested => {
                    let retry_ctx = ErrorContext {
                        element_key: element.key.clone(),
                        category: executor.error_category(),
                        message: elem_ctx.error_message.clone().unwrap_or_default(),
                    };
                    // The ErrorHandler's retry action only reports success or
                    // failure; the actual NodeResult from a successful retry
                    // is threaded out through these cells since the closure
                    // is called once per attempt and must own `elem_ctx`
                    // across calls.
                    let ctx_cell = RefCell::new(elem_ctx);
                    let last_result_cell: RefCell<Option<NodeResult>> = RefCell::new(None);
                    let result = error_handler
                        .handle_error(
                            &retry_ctx,
                            &self.retry_policy,
                            |_attempt| async {
                                let mut guard = ctx_cell.borrow_mut();
                                match executor.execute(&mut guard).await {
                                    Ok(r) => {
                                        let ok = r.success;
                                        *last_result_cell.borrow_mut() = Some(r);
                                        if ok {
                                            Ok(())
                                        } else {
                                            Err("retried execution failed".to_string())
                                        }
                                    }
                                    Err(e) => Err(e.to_string()),
                                }
                            },
                            &cancellation,
                        )
                        .await;
                    elem_ctx = ctx_cell.into_inner();

                    match result {
                        ErrorResult::SuccessAfterRetry(_) => {
                            let node_result = last_result_cell.into_inner().unwrap_or_else(|| {
                                NodeResult::success(ports::SUCCESS, Default::default())
                            });
                            self.route_success(
                                &router,
                                definition,
                                element,
                                &node_result,
                                &mut memory,
                                &mut stack,
                                &mut ctx,
                                &elem_ctx,
                            )
                            .await;
                        }
                        ErrorResult::Fatal(message) => {
                            match self.dispatch_exception(
                                &mut memory,
                                &mut stack,
                                &executor.error_category(),
                                &message,
                            ) {
                                ExceptionDispatch::Handled => {
                                    ctx.completed_node_count += 1;
                                    ctx.elements.push(elem_ctx);
                                }
                                ExceptionDispatch::Fatal(message) => {
                                    ctx.state = ThreadState::Failed;
                                    ctx.elements.push(elem_ctx);
                                    fatal_error = Some(
                                        EngineError::Fatal {
                                            element: element.key.clone(),
                                            message,
                                        }
                                        .to_string(),
                                    );
                                    break;
                                }
                            }
                        }
                    }
                }
                ElementOutcome::Completed(result) => {
                    self.tracing.record_node(
                        &thread_exec_id,
                        NodeExecutionTrace {
                            element_key: element.key.clone(),
                            type_name: element.type_name.clone(),
                            sequence: ctx.completed_node_count + 1,
                            started_at: elem_ctx.started_at.unwrap_or_else(Utc::now),
                            completed_at: elem_ctx.stopped_at.unwrap_or_else(Utc::now),
                            duration_ms: elem_ctx.duration_ms().unwrap_or(0),
                            result: if result.success {
                                NodeTraceResult::Success
                            } else {
                                NodeTraceResult::Failed
                            },
                            output_port: result.output_port.clone(),
                            output_snapshot: truncate_snapshot(
                                &serde_json::to_value(&result.output_data).unwrap_or(Value::Null),
                            ),
                            error_message: result.error_message.clone(),
                        },
                    );
                    self.events
                        .publish(WorkflowEvent::node_executed(&elem_ctx, result.clone()))
                        .await;

                    if !result.success && elem_ctx.status != NodeStatus::Timeout {
                        let category = executor.error_category();
                        let message = result
                            .error_message
                            .clone()
                            .unwrap_or_else(|| "element failed".to_string());

                        self.events
                            .publish(WorkflowEvent::error(
                                &elem_ctx,
                                &EngineError::Fatal {
                                    element: element.key.clone(),
                                    message: message.clone(),
                                },
                            ))
                            .await;

                        let error_trace = |recovered: bool| ErrorTrace {
                            error_type: category.clone(),
                            message: message.clone(),
                            stack: None,
                            severity: "error".to_string(),
                            recovery_action: None,
                            recovered,
                        };

                        // A node failure only unwinds the whole execution when a
                        // try frame is active and neither catch nor finally claim
                        // it (and even then, `continue_on_fail` keeps it local).
                        // With no enclosing try, the failure just routes its
                        // `error` port below like any other outcome.
                        if memory.current_try().is_some() {
                            match self.dispatch_exception(&mut memory, &mut stack, &category, &message) {
                                ExceptionDispatch::Handled => {
                                    self.tracing.record_error(&thread_exec_id, error_trace(true));
                                    ctx.completed_node_count += 1;
                                    ctx.elements.push(elem_ctx);
                                    continue;
                                }
                                ExceptionDispatch::Fatal(_) if element.continue_on_fail => {
                                    self.tracing.record_error(&thread_exec_id, error_trace(false));
                                    // fall through to normal error-port routing below
                                }
                                ExceptionDispatch::Fatal(fatal_message) => {
                                    self.tracing.record_error(&thread_exec_id, error_trace(false));
                                    ctx.state = ThreadState::Failed;
                                    ctx.elements.push(elem_ctx);
                                    fatal_error = Some(
                                        EngineError::Fatal {
                                            element: element.key.clone(),
                                            message: fatal_message,
                                        }
                                        .to_string(),
                                    );
                                    break;
                                }
                            }
                        } else {
                            self.tracing.record_error(&thread_exec_id, error_trace(false));
                        }
                    }

                    self.route_success(
                        &router, definition, element, &result, &mut memory, &mut stack, &mut ctx, &elem_ctx,
                    )
                    .await;
                }
            }
        }

        if ctx.state == ThreadState::Running {
            ctx.state = ThreadState::Completed;
        }
        ctx.output = memory.node_outputs().clone();

        self.unregister_active(&thread_exec_id).await;
        let stopped_at = Utc::now();
        let record = ExecutionRecord::from_context(&ctx, mode, stopped_at, fatal_error);
        self.persistence.update(&ctx).await?;
        self.events
            .publish(WorkflowEvent::WorkflowCompleted {
                thread_exec_id: thread_exec_id.clone(),
                record: record.clone(),
            })
            .await;
        self.tracing.complete(&thread_exec_id, ctx.state);
        Ok(record)
    }

    /// Apply loop-signal handling and routing for a node that finished
    /// normally (including a successful retry).
    #[allow(clippy::too_many_arguments)]
    async fn route_success(
        &self,
        router: &Router<'_>,
        definition: &ThreadDefinition,
        element: &crate::model::Element,
        result: &NodeResult,
        memory: &mut ExecutionMemory,
        stack: &mut Vec<String>,
        ctx: &mut ThreadExecutionContext,
        elem_ctx: &ElementExecutionContext,
    ) {
        if let Ok(value) = serde_json::to_value(&result.output_data) {
            memory.set_node_output(element.key.clone(), value);
        }
        ctx.elements.push(elem_ctx.clone());

        if let Some(frame) = memory.current_try() {
            if frame.finally_key.as_deref() == Some(element.key.as_str()) {
                memory.exit_try();
            }
        }

        if memory.is_break() || memory.is_continue() {
            memory.clear_signals();
            ctx.completed_node_count += 1;
            return;
        }

        let vars = memory.variables_snapshot();
        let downstream = router.downstream_for_port(element, &result.output_port, definition, &vars);
        for target in downstream.into_iter().rev() {
            stack.push(target.key.clone());
        }
        ctx.completed_node_count += 1;
    }

    /// Find a catch handler for `error_type` in the current try frame, or
    /// decide the error is fatal. If a finally exists with no matching
    /// catch, the finally is scheduled and the exception is considered
    /// re-raised once it completes (tracked by the caller re-dispatching
    /// after the finally element's own Completed branch runs its course via
    /// the normal loop, since the try frame is popped only once finally
    /// runs out of unhandled work).
    fn dispatch_exception(
        &self,
        memory: &mut ExecutionMemory,
        stack: &mut Vec<String>,
        error_type: &str,
        message: &str,
    ) -> ExceptionDispatch {
        if memory.current_try().is_some() {
            if let Some(catch_key) = memory.find_catch_handler(error_type, &[]) {
                memory.set_current_exception(Value::String(message.to_string()));
                let _ = memory.set("__exception_type__", Value::String(error_type.to_string()));
                if let Some(frame) = memory.current_try_mut() {
                    frame.exception_occurred = true;
                    frame.last_exception = Some(Value::String(message.to_string()));
                }
                let finally_key = memory.current_try().and_then(|f| f.finally_key.clone());
                if let Some(finally_key) = finally_key {
                    stack.push(finally_key);
                }
                stack.push(catch_key);
                return ExceptionDispatch::Handled;
            }
            let finally_key = memory.current_try().and_then(|f| f.finally_key.clone());
            if let Some(finally_key) = finally_key {
                stack.push(finally_key);
                return ExceptionDispatch::Handled;
            }
        }
        ExceptionDispatch::Fatal(message.to_string())
    }

    // --- Sub-workflow invocation ------------------------------------------------

    /// Invoke the orchestration loop recursively for a child thread,
    /// inheriting the parent's process context. Callers (typically a
    /// sub-workflow-invoking executor) are responsible for merging the
    /// returned `subworkflow.<k>` outputs back into their own node output.
    pub async fn invoke_sub_workflow(
        &self,
        root_exec_id: &str,
        child_thread_id: i64,
        child_version_id: i64,
        parent_outputs: &HashMap<String, Value>,
        parent_vars: &HashMap<String, Value>,
    ) -> EngineResult<HashMap<String, Value>> {
        {
            let mut depths = self.nesting_depth.lock().await;
            let depth = depths.entry(root_exec_id.to_string()).or_insert(0);
            if *depth >= self.config.max_nesting_depth {
                return Err(EngineError::NestingDepthExceeded {
                    element: root_exec_id.to_string(),
                    cap: self.config.max_nesting_depth,
                });
            }
            *depth += 1;
        }

        let outcome = self.run_sub_workflow_inner(child_thread_id, child_version_id, parent_outputs, parent_vars).await;

        {
            let mut depths = self.nesting_depth.lock().await;
            if let Some(depth) = depths.get_mut(root_exec_id) {
                *depth = depth.saturating_sub(1);
            }
        }

        outcome
    }

    async fn run_sub_workflow_inner(
        &self,
        child_thread_id: i64,
        child_version_id: i64,
        parent_outputs: &HashMap<String, Value>,
        parent_vars: &HashMap<String, Value>,
    ) -> EngineResult<HashMap<String, Value>> {
        let mut input = HashMap::new();
        for (k, v) in parent_outputs {
            input.insert(format!("parent.output.{k}"), v.clone());
        }
        for (k, v) in parent_vars {
            input.insert(format!("parent.var.{k}"), v.clone());
        }

        let record = self
            .execute_process(child_thread_id, child_version_id, input, ExecutionMode::SubProcess)
            .await?;

        let mut reflected = HashMap::new();
        if let Value::Object(map) = &record.output {
            for (k, v) in map {
                reflected.insert(format!("subworkflow.{k}"), v.clone());
            }
        }
        Ok(reflected)
    }
}

enum ExceptionDispatch {
    Handled,
    Fatal(String),
}

/// Config shape for a `"try"`-type element: the catch handlers and optional
/// finally key to register on the try stack when this element is popped.
/// Mirrors the plain-JSON-config convention every other node type here uses.
#[derive(serde::Deserialize, Default)]
struct TryConfig {
    #[serde(default)]
    catches: Vec<TryCatchConfig>,
    #[serde(default)]
    finally_key: Option<String>,
}

#[derive(serde::Deserialize)]
struct TryCatchConfig {
    catch_key: String,
    #[serde(default)]
    exception_type: Option<String>,
}

/// Enter a try frame for a `"try"`-type element and wire its catch handlers
/// and finally key from its config. A malformed or empty config still opens
/// an (unhandled) frame rather than failing the element.
fn setup_try_frame(memory: &mut ExecutionMemory, element: &crate::model::Element) {
    memory.enter_try(element.key.clone());
    let config: TryConfig = if element.config.trim().is_empty() {
        TryConfig::default()
    } else {
        serde_json::from_str(&element.config).unwrap_or_default()
    };
    for catch in config.catches {
        memory.add_catch(catch.catch_key, catch.exception_type);
    }
    if let Some(finally_key) = config.finally_key {
        memory.set_finally(finally_key);
    }
}
