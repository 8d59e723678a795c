//! Engine facade.
//!
//! Owns the catalog, the provider chains, the spend ledger, credentials and
//! the iteration slots, and exposes the operations the CLI (or an embedding
//! agent) calls: direct generation, iteration, detection and pipeline runs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::adapters::http::build_client;
use crate::adapters::{backend_for, BackendSettings};
use crate::config::{Credentials, ResolvedConfig};
use crate::domain::{Capability, CapabilityRequest, PipelineRun};
use crate::error::EngineError;

use super::catalog::Catalog;
use super::chain::{ChainPlan, ChainSet, ChainSuccess, ProviderChain, ProviderSpec};
use super::detector::{Detection, Detector};
use super::executor::{Executor, PipelinePlan};
use super::iteration::{IterationState, IterationStore};
use super::ledger::SpendLedger;

/// Options for a direct capability invocation
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Use only this provider
    pub provider: Option<String>,

    /// Report what would happen without invoking anything
    pub dry_run: bool,

    /// Refuse to run when the first available provider is estimated above this
    pub budget_limit: Option<f64>,

    /// Output file base (defaults to a timestamped path under the output root)
    pub output_path: Option<PathBuf>,
}

/// Options for a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run directory; reusing one skips steps already completed in it
    pub output_dir: Option<PathBuf>,
}

/// Outcome of `generate` or `iterate`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Generation {
    DryRun {
        capability: Capability,
        input: Value,
        config: Map<String, Value>,
        plan: ChainPlan,
    },
    Generated(ChainSuccess),
}

/// The capability composition engine
pub struct Engine {
    config: ResolvedConfig,
    catalog: Catalog,
    chains: ChainSet,
    ledger: SpendLedger,
    credentials: Credentials,
    iterations: IterationStore,
}

impl Engine {
    /// Assemble an engine from its parts (no credentials)
    pub fn new(config: ResolvedConfig, catalog: Catalog, chains: ChainSet, ledger: SpendLedger) -> Self {
        let iterations = IterationStore::new(config.iteration_dir());
        Self {
            config,
            catalog,
            chains,
            ledger,
            credentials: Credentials::default(),
            iterations,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Build the engine with the real backends described by the configuration
    pub async fn from_config(config: ResolvedConfig) -> Result<Self> {
        let credentials = Credentials::load(&config.home)?;
        let ledger = SpendLedger::open(config.ledger_path()).await?;
        let chains = default_chains(&config)?;

        let mut catalog = Catalog::builtin();
        if let Some(ref path) = config.pipelines_file {
            catalog = catalog.load_file(path)?;
        }

        info!(
            home = %config.home.display(),
            pipelines = catalog.len(),
            credentials = ?credentials.present(),
            "Engine ready"
        );
        Ok(Self::new(config, catalog, chains, ledger).with_credentials(credentials))
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn chains(&self) -> &ChainSet {
        &self.chains
    }

    pub fn ledger(&self) -> &SpendLedger {
        &self.ledger
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn iterations(&self) -> &IterationStore {
        &self.iterations
    }

    /// Invoke a capability directly; success overwrites its iteration slot
    #[instrument(skip(self, capability, input, config, options), fields(capability = %capability))]
    pub async fn generate(
        &self,
        capability: Capability,
        input: Value,
        config: Map<String, Value>,
        options: GenerateOptions,
    ) -> Result<Generation, EngineError> {
        let request = CapabilityRequest {
            capability,
            input,
            config,
            output_path: None,
        };
        self.execute(request, options, true).await
    }

    /// Re-run the last generation of a capability with an adjustment
    #[instrument(skip(self, capability, adjustment, options), fields(capability = %capability))]
    pub async fn iterate(
        &self,
        capability: Capability,
        adjustment: &str,
        options: GenerateOptions,
    ) -> Result<Generation, EngineError> {
        let state = self
            .iterations
            .load(capability)?
            .ok_or(EngineError::NothingToIterate { capability })?;

        info!(provider = %state.provider, "Iterating on previous generation");
        self.execute(state.adjusted_request(adjustment), options, false)
            .await
    }

    async fn execute(
        &self,
        mut request: CapabilityRequest,
        options: GenerateOptions,
        remember: bool,
    ) -> Result<Generation, EngineError> {
        let capability = request.capability;
        let chain = self.chain(capability, options.provider.as_deref())?;

        if options.dry_run {
            let plan = chain.plan(&request, &self.ledger, &self.credentials);
            return Ok(Generation::DryRun {
                capability,
                input: request.input,
                config: request.config,
                plan,
            });
        }

        if let Some(limit) = options.budget_limit {
            let plan = chain.plan(&request, &self.ledger, &self.credentials);
            if plan.estimated_cost > limit {
                warn!(estimated = plan.estimated_cost, limit, "Over budget, not invoking");
                return Err(EngineError::OverBudget {
                    estimated: plan.estimated_cost,
                    limit,
                });
            }
        }

        request.output_path = Some(
            options
                .output_path
                .unwrap_or_else(|| self.config.generation_output(capability)),
        );

        let success = chain
            .invoke(&request, &self.ledger, &self.credentials)
            .await?;

        if remember {
            let state = IterationState {
                capability,
                original_input: request.input,
                config: request.config,
                provider: success.provider.clone(),
                location: success.output.location.clone(),
                cost: success.cost,
                timestamp: Utc::now(),
            };
            if let Err(e) = self.iterations.save(&state) {
                warn!(error = %e, "Failed to save iteration slot");
            }
        }

        Ok(Generation::Generated(success))
    }

    /// The capability's chain, optionally pinned to one provider
    fn chain(&self, capability: Capability, provider: Option<&str>) -> Result<ProviderChain, EngineError> {
        let chain = self.chains.chain_for(capability);
        match provider {
            Some(name) => chain.pinned(name),
            None => Ok(chain),
        }
    }

    /// Match free text to a pipeline
    pub fn detect(&self, input: &str) -> Detection {
        Detector::new(&self.catalog).detect(input)
    }

    /// Dry-run a pipeline: no invocations, no directories, no state
    pub fn plan_pipeline(&self, name: &str, options: &RunOptions) -> Result<PipelinePlan, EngineError> {
        let pipeline = self.catalog.get(name)?;
        Ok(PipelinePlan::new(pipeline, self.output_dir(name, options)))
    }

    /// Execute a pipeline by name
    pub async fn run_pipeline(
        &self,
        name: &str,
        context: Map<String, Value>,
        options: RunOptions,
    ) -> Result<PipelineRun, EngineError> {
        let pipeline = self.catalog.get(name)?;
        let output_dir = self.output_dir(name, &options);

        Executor::new(&self.chains, &self.ledger, &self.credentials)
            .run(pipeline, context, output_dir)
            .await
    }

    fn output_dir(&self, name: &str, options: &RunOptions) -> PathBuf {
        options
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.run_output_dir(name))
    }
}

/// Provider chains for every capability, in configured order
pub fn default_chains(config: &ResolvedConfig) -> Result<ChainSet> {
    let settings = BackendSettings {
        client: build_client(config.provider_timeout)?,
        deploy_command: config.deploy_command.clone(),
        montage_command: config.montage_command.clone(),
    };

    let mut chains = ChainSet::new();
    for capability in Capability::ALL {
        let specs = config
            .providers_for(capability)
            .into_iter()
            .map(|kind| {
                ProviderSpec::for_kind(kind, backend_for(kind, &settings))
                    .with_timeout(config.provider_timeout)
            })
            .collect();

        let chain = ProviderChain::new(capability, specs)
            .with_context(|| format!("Invalid provider chain for {}", capability))?;
        chains.insert(chain);
    }

    Ok(chains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_chains_follow_configured_order() {
        let temp = TempDir::new().unwrap();
        let mut config = ResolvedConfig::with_home(temp.path());
        config.provider_order.insert(
            Capability::Text,
            vec![crate::domain::ProviderKind::OpenAiMini],
        );

        let chains = default_chains(&config).unwrap();
        assert_eq!(chains.chain_for(Capability::Text).names(), ["openai"]);
        assert_eq!(
            chains.chain_for(Capability::Image).names(),
            ["pexels", "gemini_imagen", "dalle3"]
        );
    }

    #[tokio::test]
    async fn test_dry_run_without_credentials_invokes_nothing() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig::with_home(temp.path());
        let ledger = SpendLedger::open(config.ledger_path()).await.unwrap();
        let chains = default_chains(&config).unwrap();
        let engine = Engine::new(config, Catalog::builtin(), chains, ledger);

        let generation = engine
            .generate(
                Capability::Image,
                Value::String("a cafe".into()),
                Map::new(),
                GenerateOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        match generation {
            Generation::DryRun { plan, .. } => {
                assert_eq!(plan.providers.len(), 3);
                assert!(plan.providers.iter().all(|p| !p.available));
                assert_eq!(plan.first_available, None);
            }
            other => panic!("expected dry run, got {other:?}"),
        }
        assert_eq!(engine.ledger().entries().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_dry_run_creates_no_home() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join(".capflow");
        let engine = Engine::from_config(ResolvedConfig::with_home(&home))
            .await
            .unwrap();

        let plan = engine
            .plan_pipeline("ugc-video", &RunOptions::default())
            .unwrap();

        assert_eq!(plan.pipeline, "ugc-video");
        assert!(!home.exists());
    }

    #[tokio::test]
    async fn test_iterate_without_slot() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig::with_home(temp.path());
        let ledger = SpendLedger::open(config.ledger_path()).await.unwrap();
        let engine = Engine::new(config, Catalog::builtin(), ChainSet::new(), ledger);

        let err = engine
            .iterate(Capability::Speech, "slower", GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NothingToIterate { capability: Capability::Speech }));
    }
}
