//! Pipeline run state.
//!
//! An [`ExecutionState`] lives for exactly one run and is never persisted;
//! the [`PipelineRun`] built from it is what the caller gets back.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::capability::Capability;

/// Transient per-run state
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    /// Read-only initial input
    pub context: Map<String, Value>,

    /// Step outputs keyed by output key, in completion order
    pub generated: Map<String, Value>,

    /// One entry per attempted step, in order
    pub step_results: Vec<StepResult>,
}

impl ExecutionState {
    pub fn new(context: Map<String, Value>) -> Self {
        Self {
            context,
            generated: Map::new(),
            step_results: Vec::new(),
        }
    }

    /// Record a successful step and store its value under the output key
    pub fn complete_step(&mut self, result: StepResult, value: Value) {
        self.generated.insert(result.output_key.clone(), value);
        self.step_results.push(result);
    }

    /// Record a failed step; nothing is written to `generated`
    pub fn fail_step(&mut self, result: StepResult) {
        self.step_results.push(result);
    }

    /// Project `generated` onto the given keys (missing keys become null)
    pub fn project(&self, keys: &[String]) -> Map<String, Value> {
        keys.iter()
            .map(|k| (k.clone(), self.generated.get(k).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

/// Outcome of one pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Zero-based step index
    pub index: usize,

    pub capability: Capability,

    pub output_key: String,

    pub success: bool,

    /// Provider that produced the result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Cost recorded for this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    /// Reused from an earlier run in the same output directory
    #[serde(default)]
    pub skipped: bool,

    /// Raw result (provider output, or failure details)
    pub result: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Created, not yet started
    Pending,

    /// Currently executing
    Running,

    /// Every step succeeded
    Completed,

    /// Halted at the first failing step
    Failed {
        step: usize,
        capability: Capability,
        error: String,
    },
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// A pipeline execution, as returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,

    pub pipeline: String,

    pub status: RunStatus,

    /// Every generated output (partial outputs when failed)
    pub generated: Map<String, Value>,

    /// Generated outputs restricted to the pipeline's final-output keys
    /// (empty unless completed)
    pub final_output: Map<String, Value>,

    pub step_results: Vec<StepResult>,

    /// Session cost read from the spend ledger when the run ended
    pub session_cost: f64,

    pub output_dir: PathBuf,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(pipeline: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            status: RunStatus::Pending,
            generated: Map::new(),
            final_output: Map::new(),
            step_results: Vec::new(),
            session_cost: 0.0,
            output_dir,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RunStatus::Failed { .. })
    }

    /// Error message for a failed run
    pub fn error(&self) -> Option<String> {
        match &self.status {
            RunStatus::Failed {
                step,
                capability,
                error,
            } => Some(format!(
                "Pipeline failed at step {}: {}: {}",
                step + 1,
                capability,
                error
            )),
            _ => None,
        }
    }
}
