//! Error types for the orchestration engine
//!
//! `EngineError` covers the taxonomy from the engine's error-handling design:
//! validation failures, timeouts, unknown node types, router failures,
//! definition-load failures, state-restore mismatches, and fatal errors
//! surfaced by the error handler. Node-level failures are translated into
//! `NodeResult` values with an `error` port rather than propagated as
//! `EngineError` — only failures that unwind a whole thread execution (or a
//! collaborator call) become an `EngineError`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A stable string discriminator carried on error values, used by
/// [`crate::memory::TryFrame`] catch matching in place of host-language
/// exception types. Executors report a category and, optionally, an
/// ancestry chain (most specific first) when they fail.
pub type ErrorCategory = String;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A node was popped whose `type_name` has no registered executor.
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    /// `Executor::validate` rejected the element before execution began.
    #[error("validation failed for element '{element}': {message}")]
    Validation { element: String, message: String },

    /// The loader could not produce a thread definition for the requested
    /// version id. Always fails the whole execution — there is no element
    /// context to route an error port to yet.
    #[error("failed to load thread definition version {version_id}: {message}")]
    DefinitionLoad { version_id: i64, message: String },

    /// Resuming a paused execution failed because the checkpoint referenced
    /// an element key that no longer exists in the current definition
    /// version, or the checkpoint itself could not be read.
    #[error("failed to restore execution {thread_exec_id}: {message}")]
    StateRestore {
        thread_exec_id: String,
        message: String,
    },

    /// The error handler exhausted retries (or classified the error as
    /// unconditionally fatal) with no enclosing try-frame to catch it.
    #[error("fatal error in element '{element}': {message}")]
    Fatal { element: String, message: String },

    /// Nesting depth of sub-workflow invocations exceeded
    /// `EngineConfig::max_nesting_depth`.
    #[error("sub-workflow nesting depth exceeded cap of {cap} at element '{element}'")]
    NestingDepthExceeded { element: String, cap: u32 },

    /// A checkpoint backend (`engine-checkpoint` or another implementation
    /// of [`crate::checkpoint::StateCheckpoint`]) returned an error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Propagated from `serde_json` when (de)serializing node output,
    /// element configuration, or execution-record payloads.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An execution was requested for a thread-execution id that the
    /// active-execution table has no record of (e.g. resuming or cancelling
    /// an id that never started, or already completed).
    #[error("no active execution for thread-execution id {0}")]
    NoSuchExecution(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_node_type_message() {
        let err = EngineError::UnknownNodeType("http.request".to_string());
        assert_eq!(err.to_string(), "unknown node type 'http.request'");
    }

    #[test]
    fn fatal_carries_element_and_message() {
        let err = EngineError::Fatal {
            element: "Flaky".to_string(),
            message: "exhausted".to_string(),
        };
        assert!(err.to_string().contains("Flaky"));
        assert!(err.to_string().contains("exhausted"));
    }
}
