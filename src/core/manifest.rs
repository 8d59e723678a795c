//! Per-run manifest of completed steps.
//!
//! Each completed step is appended to `steps.jsonl` in the run's output
//! directory, keyed by an idempotency key derived from the step's resolved
//! input. Re-running a pipeline into the same directory reuses the recorded
//! value instead of invoking a provider again.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::domain::Capability;

pub const MANIFEST_FILE: &str = "steps.jsonl";

/// A completed step, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub idempotency_key: String,
    pub index: usize,
    pub capability: Capability,
    pub output_key: String,
    pub provider: String,
    pub cost: f64,
    /// Value stored under the output key
    pub value: Value,
    /// Full provider output
    #[serde(default)]
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

/// JSONL manifest inside a run output directory
#[derive(Debug, Clone)]
pub struct RunManifest {
    path: PathBuf,
}

impl RunManifest {
    /// Manifest for an output directory (nothing is created until an append)
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(MANIFEST_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a completed step
    pub async fn append(&self, entry: &ManifestEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open manifest: {}", self.path.display()))?;

        let json = serde_json::to_string(entry).context("Failed to serialize manifest entry")?;
        file.write_all(json.as_bytes())
            .await
            .context("Failed to write manifest entry")?;
        file.write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        file.flush().await.context("Failed to flush manifest")?;

        Ok(())
    }

    /// Replay every entry; unreadable lines are skipped
    pub async fn entries(&self) -> Result<Vec<ManifestEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read manifest: {}", self.path.display()))?;

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Most recent completion for an idempotency key
    pub async fn find(&self, idempotency_key: &str) -> Result<Option<ManifestEntry>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .rev()
            .find(|e| e.idempotency_key == idempotency_key))
    }
}

/// Idempotency key for a step: pipeline, position, capability and input hash
pub fn generate_idempotency_key(
    pipeline: &str,
    index: usize,
    capability: Capability,
    input: &Value,
    config: &Map<String, Value>,
) -> String {
    let material = serde_json::json!({"input": input, "config": config}).to_string();
    format!("{}:{}:{}:{}", pipeline, index, capability, hash_input(&material))
}

/// Hash input content (first 16 hex chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
