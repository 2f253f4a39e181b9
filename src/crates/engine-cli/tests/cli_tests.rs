//! Integration tests for engine-cli's definition loading and validation
//! logic, exercised directly against the YAML shapes the `validate` and
//! `run` subcommands accept.

use std::fs;

use engine_core::model::ThreadDefinition;
use tempfile::TempDir;

fn write_definition(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("thread.yaml");
    fs::write(&path, yaml).expect("write definition");
    path
}

const VALID_DEFINITION: &str = r#"id: 1
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

#[test]
fn valid_definition_parses_and_has_one_trigger() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, VALID_DEFINITION);
    let raw = fs::read_to_string(path).unwrap();
    let definition: ThreadDefinition = serde_yaml::from_str(&raw).unwrap();

    assert_eq!(definition.trigger_elements().len(), 1);
    assert_eq!(definition.elements.len(), 2);
    assert_eq!(definition.connections.len(), 1);
}

#[test]
fn connection_to_unknown_target_is_structurally_detectable() {
    let dangling = r#"id: 1
version_id: 1
name: broken
elements:
  - id: 1
    key: start
    type_name: log
    is_trigger: true
connections:
  - source_element_id: 1
    target_element_id: 99
"#;
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, dangling);
    let raw = fs::read_to_string(path).unwrap();
    let definition: ThreadDefinition = serde_yaml::from_str(&raw).unwrap();

    let connection = &definition.connections[0];
    assert!(definition.element_by_id(connection.target_element_id).is_none());
}

#[test]
fn definition_without_a_trigger_is_structurally_detectable() {
    let no_trigger = r#"id: 1
version_id: 1
name: inert
elements:
  - id: 1
    key: only
    type_name: echo
connections: []
"#;
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, no_trigger);
    let raw = fs::read_to_string(path).unwrap();
    let definition: ThreadDefinition = serde_yaml::from_str(&raw).unwrap();

    assert!(definition.trigger_elements().is_empty());
}

#[test]
fn defaults_fill_in_omitted_element_and_connection_fields() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, VALID_DEFINITION);
    let raw = fs::read_to_string(path).unwrap();
    let definition: ThreadDefinition = serde_yaml::from_str(&raw).unwrap();

    let finish = definition.element_by_key("finish").unwrap();
    assert_eq!(finish.max_retries, 3);
    assert_eq!(finish.timeout_seconds, 300);
    assert!(!finish.disabled);
}
