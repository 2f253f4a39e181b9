//! Engine-wide configuration. Loadable from TOML or built up directly in
//! code; every field has a default matching the element-level fallbacks used
//! elsewhere in the crate.

use serde::{Deserialize, Serialize};

use crate::model::DEFAULT_TIMEOUT_SECONDS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_timeout_seconds: i64,
    pub default_max_retries: u32,
    pub trace_soft_cap: usize,
    /// Hard cap on sub-workflow invocation depth, counting the root
    /// execution as depth 0.
    pub max_nesting_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            default_max_retries: 3,
            trace_soft_cap: 1000,
            max_nesting_depth: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.default_timeout_seconds, 300);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.trace_soft_cap, 1000);
        assert_eq!(config.max_nesting_depth, 10);
    }

    #[test]
    fn from_toml_overrides_selected_fields() {
        let config = EngineConfig::from_toml("max_nesting_depth = 4\n").unwrap();
        assert_eq!(config.max_nesting_depth, 4);
        assert_eq!(config.default_max_retries, 3);
    }

    #[test]
    fn from_toml_rejects_malformed_input() {
        assert!(EngineConfig::from_toml("max_nesting_depth = [").is_err());
    }
}
