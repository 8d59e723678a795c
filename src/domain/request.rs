//! The payload handed to a capability.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::capability::Capability;

/// One capability invocation: input, configuration and where to write files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub capability: Capability,

    /// Resolved input (text, list of texts, or an object for multi-input steps)
    pub input: Value,

    /// Resolved configuration (style, voice, copy_type, ...)
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Output path without extension; providers add their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl CapabilityRequest {
    pub fn new(capability: Capability, input: impl Into<Value>) -> Self {
        Self {
            capability,
            input: input.into(),
            config: Map::new(),
            output_path: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Flatten the input into prompt text
    pub fn prompt(&self) -> String {
        flatten(&self.input)
    }

    /// Prompt followed by the non-empty configuration as a bracketed annotation
    pub fn annotated_prompt(&self) -> String {
        let prompt = self.prompt();
        let notes: Vec<String> = self
            .config
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("{}: {}", k, flatten(v)))
            .collect();

        if notes.is_empty() {
            prompt
        } else {
            format!("{}\n\n[{}]", prompt, notes.join(", "))
        }
    }

    /// String-valued config entry
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Config entry rendered as text, whatever its JSON type
    pub fn config_text(&self, key: &str) -> Option<String> {
        self.config.get(key).filter(|v| !v.is_null()).map(flatten)
    }

    /// Output file for a given extension (parent directories are created)
    pub fn output_file(&self, extension: &str) -> Result<PathBuf> {
        let base = self
            .output_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("{} request has no output path", self.capability))?;
        let path = base.with_extension(extension);
        ensure_parent(&path)?;
        Ok(path)
    }

    /// First 100 characters of the prompt, for ledger details and logs
    pub fn summary(&self) -> String {
        self.prompt().chars().take(100).collect()
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(flatten)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map
            .values()
            .map(flatten)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
