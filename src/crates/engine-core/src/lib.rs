//! Stack-based process-thread orchestration engine.
//!
//! A [`model::ThreadDefinition`] describes a graph of typed
//! [`model::Element`]s joined by [`model::Connection`]s. [`engine::Engine`]
//! traverses it with a LIFO stack, dispatching each popped element to a
//! registered [`executor::NodeExecutor`], routing its output through
//! [`router::Router`], and folding the run into an [`record::ExecutionRecord`].

pub mod cancellation;
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod element_executor;
pub mod engine;
pub mod error;
pub mod error_handler;
pub mod events;
pub mod executor;
pub mod memory;
pub mod model;
pub mod record;
pub mod registry;
pub mod retry;
pub mod router;
pub mod trace;

pub use cancellation::{CancelCause, CancellationToken};
pub use context::{ElementExecutionContext, NodeStatus, ThreadExecutionContext, ThreadState};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use executor::{NodeExecutor, NodeResult, ValidationResult};
pub use memory::ExecutionMemory;
pub use model::{Connection, Element, ThreadDefinition, TimeoutBehavior};
pub use record::{ExecutionMode, ExecutionRecord};
