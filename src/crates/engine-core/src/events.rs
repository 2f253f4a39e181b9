//! Lifecycle event fan-out.
//!
//! Exactly five event kinds. Subscriber errors are
//! caught and logged; a handler panicking or erroring never aborts
//! orchestration, and handlers run in registration order for a single node
//! (ordering across different nodes is not guaranteed and must not be
//! relied upon).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::warn;

use crate::context::{ElementExecutionContext, ThreadExecutionContext};
use crate::executor::NodeResult;
use crate::record::ExecutionRecord;
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    WorkflowStarting {
        thread_exec_id: String,
    },
    NodeExecuting {
        thread_exec_id: String,
        element_key: String,
    },
    NodeExecuted {
        thread_exec_id: String,
        element_key: String,
        result: NodeResult,
    },
    Error {
        thread_exec_id: String,
        element_key: String,
        error: String,
    },
    WorkflowCompleted {
        thread_exec_id: String,
        record: ExecutionRecord,
    },
}

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &WorkflowEvent);
}

/// Cooperative fan-out: every registered handler is called, in registration
/// order, for every event. A handler that panics is caught so one bad
/// subscriber cannot take down orchestration.
#[derive(Default)]
pub struct EventPublisher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub async fn publish(&self, event: WorkflowEvent) {
        for handler in &self.handlers {
            let handler = handler.clone();
            let event_ref = event.clone();
            let outcome = AssertUnwindSafe(async move { handler.handle(&event_ref).await })
                .catch_unwind()
                .await;
            if outcome.is_err() {
                warn!("event handler panicked; continuing orchestration");
            }
        }
    }
}

/// Convenience constructors mirroring the element/thread contexts the loop
/// has on hand at each emission point.
impl WorkflowEvent {
    pub fn node_executing(ctx: &ElementExecutionContext) -> Self {
        WorkflowEvent::NodeExecuting {
            thread_exec_id: ctx.thread_exec_id.clone(),
            element_key: ctx.element_key.clone(),
        }
    }

    pub fn node_executed(ctx: &ElementExecutionContext, result: NodeResult) -> Self {
        WorkflowEvent::NodeExecuted {
            thread_exec_id: ctx.thread_exec_id.clone(),
            element_key: ctx.element_key.clone(),
            result,
        }
    }

    pub fn error(ctx: &ElementExecutionContext, error: &EngineError) -> Self {
        WorkflowEvent::Error {
            thread_exec_id: ctx.thread_exec_id.clone(),
            element_key: ctx.element_key.clone(),
            error: error.to_string(),
        }
    }

    pub fn workflow_starting(ctx: &ThreadExecutionContext) -> Self {
        WorkflowEvent::WorkflowStarting {
            thread_exec_id: ctx.thread_exec_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &WorkflowEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _event: &WorkflowEvent) {
            panic!("subscriber bug");
        }
    }

    #[tokio::test]
    async fn every_handler_is_invoked_in_order() {
        let mut publisher = EventPublisher::new();
        let count = Arc::new(AtomicUsize::new(0));
        publisher.subscribe(Arc::new(CountingHandler(count.clone())));
        publisher.subscribe(Arc::new(CountingHandler(count.clone())));
        publisher
            .publish(WorkflowEvent::WorkflowStarting {
                thread_exec_id: "exec-1".to_string(),
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_panicking_handler_does_not_stop_the_others() {
        let mut publisher = EventPublisher::new();
        let count = Arc::new(AtomicUsize::new(0));
        publisher.subscribe(Arc::new(PanickingHandler));
        publisher.subscribe(Arc::new(CountingHandler(count.clone())));
        publisher
            .publish(WorkflowEvent::WorkflowStarting {
                thread_exec_id: "exec-1".to_string(),
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
