//! Core engine logic.
//!
//! This module contains:
//! - SpendLedger: Append-only cost log and budget checks
//! - ProviderChain: Ordered provider fallback per capability
//! - Catalog / Detector: Named pipelines and intent matching
//! - Executor: Sequential pipeline execution with a per-run manifest
//! - IterationStore: Last-generation slots for refinement
//! - Engine: Facade tying the pieces together

pub mod catalog;
pub mod chain;
pub mod detector;
pub mod engine;
pub mod executor;
pub mod iteration;
pub mod ledger;
pub mod manifest;
pub mod pipeline;

// Re-export commonly used types
pub use catalog::Catalog;
pub use chain::{ChainPlan, ChainSet, ChainSuccess, PlannedProvider, ProviderChain, ProviderSpec};
pub use detector::{Detection, Detector};
pub use engine::{default_chains, Engine, GenerateOptions, Generation, RunOptions};
pub use executor::{Executor, PipelinePlan, PlannedStep};
pub use iteration::{IterationState, IterationStore};
pub use ledger::{unit_price, SpendLedger};
pub use manifest::{generate_idempotency_key, hash_input, ManifestEntry, RunManifest, MANIFEST_FILE};
pub use pipeline::{resolve, InputRef, PipelineDefinition, StepDefinition};
