use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-run execution configuration.
///
/// Bound once per run and readable from any component through
/// [`current_config`](crate::context::current_config). The adapter fields are
/// never interpreted by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Run operators whose outputs are all plots. When false their outputs are
    /// reported as empty objects and the operators are skipped.
    #[serde(default)]
    pub run_pure_plot_operators: bool,
    /// Collect the outputs of every step in the execution result.
    #[serde(default)]
    pub return_individual_node_results: bool,
    /// Timeout handed through to the adapter layer.
    #[serde(default)]
    pub adapter_timeout_secs: Option<u64>,
    /// Free-form settings handed through to the adapter layer.
    #[serde(default)]
    pub adapter_settings: serde_json::Value,
}

impl ExecutionConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Leave unset variables untouched
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
