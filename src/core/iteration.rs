//! Last-generation slots for iterative refinement.
//!
//! One slot per capability domain (`home/iteration/<domain>.json`). Every
//! successful non-iterative generation overwrites its slot; an iteration
//! reads it back and derives a new input from the original plus an
//! adjustment.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::domain::{Capability, CapabilityRequest};

/// Instruction appended to text iterations
const TEXT_ITERATION_INSTRUCTION: &str =
    "Apply the adjustment while keeping the essence and structure. Return only the adjusted version.";

/// What is remembered about the last generation of a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub capability: Capability,

    /// Input exactly as originally given
    pub original_input: Value,

    /// Resolved configuration of the original call
    #[serde(default)]
    pub config: Map<String, Value>,

    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    pub cost: f64,

    pub timestamp: DateTime<Utc>,
}

impl IterationState {
    /// Request for an iteration: derived input, original configuration
    pub fn adjusted_request(&self, adjustment: &str) -> CapabilityRequest {
        CapabilityRequest {
            capability: self.capability,
            input: Value::String(self.adjusted_input(adjustment)),
            config: self.config.clone(),
            output_path: None,
        }
    }

    /// Original input combined with a caller adjustment
    pub fn adjusted_input(&self, adjustment: &str) -> String {
        let original = CapabilityRequest::new(self.capability, self.original_input.clone()).prompt();
        let adjustment = adjustment.trim();

        match self.capability {
            Capability::Text => format!(
                "ORIGINAL:\n{}\n\nADJUSTMENT: {}\n\n{}",
                original, adjustment, TEXT_ITERATION_INSTRUCTION
            ),
            _ => format!("{}, {}", original, adjustment),
        }
    }
}

/// Directory of per-domain slots
#[derive(Debug, Clone)]
pub struct IterationStore {
    dir: PathBuf,
}

impl IterationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, capability: Capability) -> PathBuf {
        self.dir.join(format!("{}.json", capability.domain()))
    }

    /// Overwrite the slot for the state's capability
    pub fn save(&self, state: &IterationState) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.slot_path(state.capability);
        let json =
            serde_json::to_string_pretty(state).context("Failed to serialize iteration state")?;

        let mut temp = NamedTempFile::new_in(&self.dir)
            .context("Failed to create temporary iteration slot")?;
        temp.write_all(json.as_bytes())
            .context("Failed to write iteration slot")?;
        temp.persist(&path)
            .with_context(|| format!("Failed to persist {}", path.display()))?;

        debug!(capability = %state.capability, path = %path.display(), "Saved iteration slot");
        Ok(path)
    }

    /// Last saved state; a missing or unreadable slot is `None`
    pub fn load(&self, capability: Capability) -> Result<Option<IterationState>> {
        let path = self.slot_path(capability);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        match serde_json::from_str(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt iteration slot");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn state(capability: Capability, input: Value) -> IterationState {
        IterationState {
            capability,
            original_input: input,
            config: Map::new(),
            provider: "pexels".to_string(),
            location: Some("/tmp/image.jpg".to_string()),
            cost: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_missing_slot_is_none() {
        let temp = TempDir::new().unwrap();
        let store = IterationStore::new(temp.path().join("iteration"));
        assert_eq!(store.load(Capability::Image).unwrap(), None);
    }

    #[test]
    fn test_save_overwrites_slot() {
        let temp = TempDir::new().unwrap();
        let store = IterationStore::new(temp.path());

        store.save(&state(Capability::Image, json!("a cafe"))).unwrap();
        store.save(&state(Capability::Image, json!("a bakery"))).unwrap();

        let loaded = store.load(Capability::Image).unwrap().unwrap();
        assert_eq!(loaded.original_input, json!("a bakery"));
        assert_eq!(store.load(Capability::Text).unwrap(), None);
    }

    #[test]
    fn test_corrupt_slot_is_none() {
        let temp = TempDir::new().unwrap();
        let store = IterationStore::new(temp.path());
        std::fs::write(temp.path().join("image.json"), "{not json").unwrap();

        assert_eq!(store.load(Capability::Image).unwrap(), None);
    }

    #[test]
    fn test_image_adjustment_appends() {
        let s = state(Capability::Image, json!("a cozy cafe"));
        assert_eq!(s.adjusted_input(" darker background "), "a cozy cafe, darker background");
    }

    #[test]
    fn test_text_adjustment_is_annotated() {
        let s = state(Capability::Text, json!("Fresh coffee every morning"));
        let adjusted = s.adjusted_input("more urgent");
        assert!(adjusted.starts_with("ORIGINAL:\nFresh coffee every morning\n\nADJUSTMENT: more urgent"));
    }
}
