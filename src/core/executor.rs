//! Pipeline executor.
//!
//! Runs a pipeline's steps strictly in order. Each step resolves its
//! references, invokes the capability's provider chain and stores the
//! primary value under its output key. The first failing step halts the run;
//! the caller gets every step result so far plus the partial outputs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Credentials;
use crate::domain::{
    Capability, CapabilityRequest, ExecutionState, PipelineRun, RunStatus, StepResult,
};
use crate::error::EngineError;

use super::chain::ChainSet;
use super::ledger::SpendLedger;
use super::manifest::{generate_idempotency_key, ManifestEntry, RunManifest};
use super::pipeline::{resolve, InputRef, PipelineDefinition, StepDefinition, Unresolved};

/// Dry-run view of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStep {
    pub index: usize,
    pub capability: Capability,
    /// Input reference as written
    pub input: String,
    pub output_key: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// What a pipeline run would do
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelinePlan {
    pub pipeline: String,
    pub description: String,
    pub steps: Vec<PlannedStep>,
    pub final_output: Vec<String>,
    pub estimated_cost: f64,
    pub estimated_time: String,
    /// Context paths the step inputs read
    pub context_required: Vec<String>,
    /// Directory a real run would write to (not created)
    pub output_dir: PathBuf,
}

impl PipelinePlan {
    pub fn new(pipeline: &PipelineDefinition, output_dir: PathBuf) -> Self {
        Self {
            pipeline: pipeline.name.clone(),
            description: pipeline.description.clone(),
            steps: pipeline
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| PlannedStep {
                    index,
                    capability: step.capability,
                    input: step.input.describe(),
                    output_key: step.output_key.clone(),
                    config: step
                        .config
                        .iter()
                        .map(|(k, v)| (k.clone(), v.describe()))
                        .collect(),
                })
                .collect(),
            final_output: pipeline.final_output.clone(),
            estimated_cost: pipeline.estimated_cost,
            estimated_time: pipeline.estimated_time.clone(),
            context_required: pipeline.context_required(),
            output_dir,
        }
    }
}

/// Executes pipelines against a set of provider chains
pub struct Executor<'a> {
    chains: &'a ChainSet,
    ledger: &'a SpendLedger,
    credentials: &'a Credentials,
}

impl<'a> Executor<'a> {
    pub fn new(chains: &'a ChainSet, ledger: &'a SpendLedger, credentials: &'a Credentials) -> Self {
        Self {
            chains,
            ledger,
            credentials,
        }
    }

    /// Execute a pipeline, writing artifacts under `output_dir`
    #[instrument(skip(self, pipeline, context, output_dir), fields(pipeline = %pipeline.name))]
    pub async fn run(
        &self,
        pipeline: &PipelineDefinition,
        context: Map<String, Value>,
        output_dir: PathBuf,
    ) -> Result<PipelineRun, EngineError> {
        pipeline.validate()?;
        check_context(pipeline, &context)?;

        let mut run = PipelineRun::new(pipeline.name.clone(), output_dir.clone());
        run.status = RunStatus::Running;
        info!(run_id = %run.id, output_dir = %output_dir.display(), "Starting pipeline execution");

        let manifest = RunManifest::new(&output_dir);
        let mut state = ExecutionState::new(context);

        for (index, step) in pipeline.steps.iter().enumerate() {
            let (input, config) = match resolve_step(pipeline, step, &state) {
                Ok(resolved) => resolved,
                Err(e) => {
                    state.fail_step(failed_step(index, step, Value::Null, &e));
                    return Ok(self.handle_run_failure(run, state, index, step, e).await);
                }
            };
            let idempotency_key =
                generate_idempotency_key(&pipeline.name, index, step.capability, &input, &config);

            let previous = match manifest.find(&idempotency_key).await {
                Ok(previous) => previous,
                Err(e) => {
                    let cause = EngineError::Storage(e);
                    state.fail_step(failed_step(index, step, Value::Null, &cause));
                    return Ok(self.handle_run_failure(run, state, index, step, cause).await);
                }
            };

            if let Some(entry) = previous {
                info!(step = index + 1, output_key = %step.output_key, "Step already completed, skipping");
                let result = StepResult {
                    index,
                    capability: step.capability,
                    output_key: step.output_key.clone(),
                    success: true,
                    provider: Some(entry.provider),
                    cost: Some(entry.cost),
                    skipped: true,
                    result: entry.result,
                    error: None,
                };
                state.complete_step(result, entry.value);
                continue;
            }

            info!(step = index + 1, capability = %step.capability, output_key = %step.output_key, "Executing step");
            let request = CapabilityRequest {
                capability: step.capability,
                input,
                config,
                output_path: Some(output_dir.join(&step.output_key)),
            };

            let chain = self.chains.chain_for(step.capability);
            let success = match chain.invoke(&request, self.ledger, self.credentials).await {
                Ok(success) => success,
                Err(e) => {
                    let result = match &e {
                        EngineError::ChainExhausted { failures, .. } => {
                            json!({ "failures": failures })
                        }
                        _ => Value::Null,
                    };
                    state.fail_step(failed_step(index, step, result, &e));
                    return Ok(self.handle_run_failure(run, state, index, step, e).await);
                }
            };

            let value = success.output.primary_value();
            let raw = serde_json::to_value(&success.output).unwrap_or_default();

            let recorded = manifest
                .append(&ManifestEntry {
                    idempotency_key,
                    index,
                    capability: step.capability,
                    output_key: step.output_key.clone(),
                    provider: success.provider.clone(),
                    cost: success.cost,
                    value: value.clone(),
                    result: raw.clone(),
                    completed_at: Utc::now(),
                })
                .await;

            if let Err(e) = recorded {
                // The provider was paid; keep what it returned on the failed step
                let cause = EngineError::Storage(e);
                let mut result = failed_step(index, step, raw, &cause);
                result.provider = Some(success.provider);
                result.cost = Some(success.cost);
                state.fail_step(result);
                return Ok(self.handle_run_failure(run, state, index, step, cause).await);
            }

            info!(step = index + 1, provider = %success.provider, cost = success.cost, "Step completed");
            state.complete_step(
                StepResult {
                    index,
                    capability: step.capability,
                    output_key: step.output_key.clone(),
                    success: true,
                    provider: Some(success.provider),
                    cost: Some(success.cost),
                    skipped: false,
                    result: raw,
                    error: None,
                },
                value,
            );
        }

        Ok(self.complete_run(pipeline, run, state).await)
    }

    async fn handle_run_failure(
        &self,
        mut run: PipelineRun,
        state: ExecutionState,
        index: usize,
        step: &StepDefinition,
        cause: EngineError,
    ) -> PipelineRun {
        run.status = RunStatus::Failed {
            step: index,
            capability: step.capability,
            error: cause.to_string(),
        };
        run.session_cost = self.session_cost(&state).await;
        run.generated = state.generated;
        run.step_results = state.step_results;
        run.completed_at = Some(Utc::now());

        error!(run_id = %run.id, step = index + 1, error = %cause, "Pipeline failed");
        run
    }

    async fn complete_run(
        &self,
        pipeline: &PipelineDefinition,
        mut run: PipelineRun,
        state: ExecutionState,
    ) -> PipelineRun {
        run.status = RunStatus::Completed;
        run.final_output = state.project(&pipeline.final_output);
        run.session_cost = self.session_cost(&state).await;
        run.generated = state.generated;
        run.step_results = state.step_results;
        run.completed_at = Some(Utc::now());

        info!(run_id = %run.id, session_cost = run.session_cost, "Pipeline completed");
        run
    }

    /// Session spend from the ledger, or this run's own charges if it cannot be read
    async fn session_cost(&self, state: &ExecutionState) -> f64 {
        match self.ledger.session_cost().await {
            Ok(cost) => cost,
            Err(e) => {
                let fallback: f64 = state
                    .step_results
                    .iter()
                    .filter(|r| !r.skipped)
                    .filter_map(|r| r.cost)
                    .sum();
                warn!(error = %e, fallback, "Cannot read session cost, reporting this run's charges");
                fallback
            }
        }
    }
}

fn failed_step(index: usize, step: &StepDefinition, result: Value, cause: &EngineError) -> StepResult {
    StepResult {
        index,
        capability: step.capability,
        output_key: step.output_key.clone(),
        success: false,
        provider: None,
        cost: None,
        skipped: false,
        result,
        error: Some(cause.to_string()),
    }
}

/// Every context path a step input reads must be present before anything runs
fn check_context(
    pipeline: &PipelineDefinition,
    context: &Map<String, Value>,
) -> Result<(), EngineError> {
    let empty = Map::new();
    for step in &pipeline.steps {
        for path in step.input.context_paths() {
            let reference = InputRef::context(path);
            if resolve(&reference, context, &empty).is_err() {
                return Err(EngineError::MissingContext {
                    pipeline: pipeline.name.clone(),
                    path: path.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Resolve a step's input and config; unresolved config context becomes null
fn resolve_step(
    pipeline: &PipelineDefinition,
    step: &StepDefinition,
    state: &ExecutionState,
) -> Result<(Value, Map<String, Value>), EngineError> {
    let input = resolve(&step.input, &state.context, &state.generated)
        .map_err(|missing| unresolved(pipeline, missing))?;

    let mut config = Map::new();
    for (key, reference) in &step.config {
        let value = match resolve(reference, &state.context, &state.generated) {
            Ok(value) => value,
            Err(Unresolved::Context(path)) => {
                debug!(key = %key, path = %path, "Optional config context absent");
                Value::Null
            }
            Err(missing) => return Err(unresolved(pipeline, missing)),
        };
        config.insert(key.clone(), value);
    }

    Ok((input, config))
}

fn unresolved(pipeline: &PipelineDefinition, missing: Unresolved) -> EngineError {
    match missing {
        Unresolved::Context(path) => EngineError::MissingContext {
            pipeline: pipeline.name.clone(),
            path,
        },
        Unresolved::Generated(key) => EngineError::InvalidPipeline {
            pipeline: pipeline.name.clone(),
            reason: format!("'generated.{}' is not available", key),
        },
    }
}
