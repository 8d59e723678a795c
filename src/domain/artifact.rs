//! Outputs produced by a provider invocation.
//!
//! An output carries either inline content (the artifact), a retrievable
//! location (file path or URL), or both, plus the raw provider payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a provider returned on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    /// Inline content (e.g. generated copy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,

    /// File path or URL of the produced artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Cost reported by the provider (USD), if it knows it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    /// Optional note for the user (e.g. "stock image, not AI generated")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Raw provider payload
    #[serde(default)]
    pub raw: Value,
}

impl ProviderOutput {
    /// Output with inline content
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            artifact: Some(content.into()),
            ..Default::default()
        }
    }

    /// Output stored at a path or URL
    pub fn located(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Default::default()
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    /// Value stored for a pipeline step: artifact, else location, else raw
    pub fn primary_value(&self) -> Value {
        if let Some(ref artifact) = self.artifact {
            return Value::String(artifact.clone());
        }
        if let Some(ref location) = self.location {
            return Value::String(location.clone());
        }
        self.raw.clone()
    }
}
