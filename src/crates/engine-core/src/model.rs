//! Thread definition data model
//!
//! A [`ThreadDefinition`] is the read-only input the orchestration loop
//! traverses: an ordered set of [`Element`]s (typed nodes) and an ordered set
//! of [`Connection`]s (directed, labeled edges). The engine never mutates a
//! definition; it only walks it.

use serde::{Deserialize, Serialize};

/// How a timed-out element should be handled, per element configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutBehavior {
    /// Route the element's `error` port (the default).
    Error,
    /// Write an empty output and route the `success` port.
    Skip,
    /// Cancel the whole thread execution.
    Cancel,
    /// Re-run the element through the error handler's retry action.
    Retry,
}

impl Default for TimeoutBehavior {
    fn default() -> Self {
        TimeoutBehavior::Error
    }
}

/// Default element timeout, in seconds, used when `timeout_seconds` is zero
/// or negative.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 300;

/// A single typed node within a thread definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Stable numeric id, unique within the thread.
    pub id: i64,
    /// Stable string key, unique within the thread. Checkpoints reference
    /// elements by key so that resume survives id renumbering.
    pub key: String,
    /// Routing key into the [`crate::registry::ExecutorRegistry`].
    pub type_name: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub is_trigger: bool,
    /// Seconds before the per-node cancellation budget fires. Zero or
    /// negative falls back to [`DEFAULT_TIMEOUT_SECONDS`].
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i64,
    #[serde(default)]
    pub timeout_behavior: TimeoutBehavior,
    #[serde(default)]
    pub continue_on_fail: bool,
    #[serde(default)]
    pub always_output_data: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Opaque JSON configuration string, interpreted by the executor.
    #[serde(default)]
    pub config: String,
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_retries() -> u32 {
    3
}

impl Element {
    /// The effective timeout, with the zero/negative fallback applied.
    pub fn effective_timeout_seconds(&self) -> i64 {
        if self.timeout_seconds <= 0 {
            DEFAULT_TIMEOUT_SECONDS
        } else {
            self.timeout_seconds
        }
    }
}

/// A directed, labeled edge from one element's output port to another
/// element's input port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub source_element_id: i64,
    #[serde(default = "default_port")]
    pub source_port: String,
    pub target_element_id: i64,
    #[serde(default = "default_input_port")]
    pub target_port: String,
    /// Evaluated only if present; an absent condition always routes.
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_port() -> String {
    "main".to_string()
}

fn default_input_port() -> String {
    "input".to_string()
}

/// A single process thread: an identifier, a version, a name, elements, and
/// connections. Read-only input to the orchestration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDefinition {
    pub id: i64,
    pub version_id: i64,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub elements: Vec<Element>,
    pub connections: Vec<Connection>,
}

fn default_enabled() -> bool {
    true
}

impl ThreadDefinition {
    /// Elements flagged as trigger nodes, in definition order — the initial
    /// seed of the orchestration loop's stack.
    pub fn trigger_elements(&self) -> Vec<&Element> {
        self.elements.iter().filter(|e| e.is_trigger).collect()
    }

    /// Look up an element by its stable string key.
    pub fn element_by_key(&self, key: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.key == key)
    }

    /// Look up an element by its numeric id.
    pub fn element_by_id(&self, id: i64) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }
}
