//! Command-line tool for validating and running process thread definitions
//! against the in-memory orchestration engine.

mod executors;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine_core::checkpoint::StateCheckpoint;
use engine_core::collaborators::{InMemoryDefinitionLoader, InMemoryThreadExecutionPersistence};
use engine_core::config::EngineConfig;
use engine_core::events::{EventHandler, EventPublisher, WorkflowEvent};
use engine_core::model::ThreadDefinition;
use engine_core::record::ExecutionMode;
use engine_core::registry::ExecutorRegistry;
use engine_core::router::ComparisonEvaluator;
use engine_core::trace::TracingService;
use engine_core::Engine;
use engine_checkpoint::InMemoryStateCheckpoint;

#[derive(Parser)]
#[command(name = "engine")]
#[command(about = "Validate and run process thread definitions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a YAML thread definition: structural checks only, no execution.
    Validate {
        /// Path to a YAML thread definition
        file: PathBuf,
    },

    /// Run a YAML thread definition to completion against demo node executors.
    Run {
        /// Path to a YAML thread definition
        file: PathBuf,

        /// Input JSON object passed to the trigger elements
        #[arg(short, long)]
        input: Option<String>,

        /// Engine config TOML (falls back to built-in defaults)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a small example thread definition to the given path.
    Init {
        /// Destination YAML file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => validate(&file)?,
        Commands::Run { file, input, config } => run(&file, input.as_deref(), config.as_deref()).await?,
        Commands::Init { path } => init(&path)?,
    }

    Ok(())
}

fn load_definition(file: &PathBuf) -> Result<ThreadDefinition> {
    let raw = fs::read_to_string(file)
        .with_context(|| format!("reading thread definition at {}", file.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing thread definition at {}", file.display()))
}

fn validate(file: &PathBuf) -> Result<()> {
    let definition = load_definition(file)?;

    if definition.trigger_elements().is_empty() {
        bail!("thread definition '{}' has no trigger elements", definition.name);
    }
    for connection in &definition.connections {
        if definition.element_by_id(connection.source_element_id).is_none() {
            bail!(
                "connection references unknown source element id {}",
                connection.source_element_id
            );
        }
        if definition.element_by_id(connection.target_element_id).is_none() {
            bail!(
                "connection references unknown target element id {}",
                connection.target_element_id
            );
        }
    }

    println!("valid: {} ({} elements, {} connections, {} triggers)",
        definition.name,
        definition.elements.len(),
        definition.connections.len(),
        definition.trigger_elements().len(),
    );
    Ok(())
}

struct PrintingEventHandler;

#[async_trait::async_trait]
impl EventHandler for PrintingEventHandler {
    async fn handle(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::WorkflowStarting { thread_exec_id } => {
                println!("[{thread_exec_id}] starting");
            }
            WorkflowEvent::NodeExecuting { thread_exec_id, element_key } => {
                println!("[{thread_exec_id}] executing {element_key}");
            }
            WorkflowEvent::NodeExecuted { thread_exec_id, element_key, result } => {
                println!("[{thread_exec_id}] {element_key} -> success={}", result.success);
            }
            WorkflowEvent::Error { thread_exec_id, element_key, error } => {
                println!("[{thread_exec_id}] error in {element_key}: {error}");
            }
            WorkflowEvent::WorkflowCompleted { thread_exec_id, record } => {
                println!(
                    "[{thread_exec_id}] completed, status {} in {}ms",
                    record.execution_status_id, record.duration_ms
                );
            }
        }
    }
}

async fn run(file: &PathBuf, input: Option<&str>, config_path: Option<&PathBuf>) -> Result<()> {
    let definition = load_definition(file)?;
    let thread_id = definition.id;
    let version_id = definition.version_id;

    let mut registry = ExecutorRegistry::new();
    let mut log_messages = HashMap::new();
    let mut set_configs = HashMap::new();
    for element in &definition.elements {
        match element.type_name.as_str() {
            "log" => {
                log_messages.insert(element.id, element.config.clone());
            }
            "set" => {
                if !element.config.trim().is_empty() {
                    let parsed: serde_json::Value = serde_json::from_str(&element.config)
                        .with_context(|| format!("set node '{}' config is not valid JSON", element.key))?;
                    set_configs.insert(element.id, parsed);
                }
            }
            _ => {}
        }
    }
    registry.register("echo", Arc::new(executors::EchoExecutor));
    registry.register("try", Arc::new(executors::EchoExecutor));
    registry.register("log", Arc::new(executors::LogExecutor { messages: log_messages }));
    registry.register("set", Arc::new(executors::SetExecutor { config: set_configs }));

    let loader = Arc::new(InMemoryDefinitionLoader::new());
    loader.insert(definition);

    let checkpoint: Arc<dyn StateCheckpoint> = Arc::new(InMemoryStateCheckpoint::new());
    let persistence = Arc::new(InMemoryThreadExecutionPersistence::new());

    let mut events = EventPublisher::new();
    events.subscribe(Arc::new(PrintingEventHandler));

    let config = match config_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading engine config at {}", path.display()))?;
            EngineConfig::from_toml(&raw).with_context(|| "parsing engine config")?
        }
        None => EngineConfig::default(),
    };

    let engine = Engine::new(
        Arc::new(registry),
        loader,
        checkpoint,
        persistence,
        Arc::new(events),
        Arc::new(TracingService::default()),
        Arc::new(ComparisonEvaluator),
        config,
    );

    let input_data: HashMap<String, serde_json::Value> = match input {
        Some(raw) => serde_json::from_str(raw).with_context(|| "parsing --input as a JSON object")?,
        None => HashMap::new(),
    };

    let record = engine
        .execute_process(thread_id, version_id, input_data, ExecutionMode::Manual)
        .await
        .context("running thread execution")?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn init(path: &PathBuf) -> Result<()> {
    let example = r#"id: 1
version_id: 1
name: example_thread
enabled: true
elements:
  - id: 1
    key: start
    type_name: log
    is_trigger: true
    config: "starting"
  - id: 2
    key: finish
    type_name: echo
connections:
  - source_element_id: 1
    source_port: success
    target_element_id: 2
    target_port: input
"#;
    fs::write(path, example).with_context(|| format!("writing example definition to {}", path.display()))?;
    println!("wrote example thread definition to {}", path.display());
    Ok(())
}
