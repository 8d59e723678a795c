//! capflow - capability composition and fallback engine
//!
//! Composes content-generation capabilities (image, copy, speech, video,
//! page deploy, montage) into named pipelines, and runs every capability
//! through an ordered chain of providers: free or cheap first, premium last.
//!
//! # Architecture
//!
//! - Every priced call is appended to a durable spend ledger; totals are
//!   always recomputed from it
//! - A provider chain tries its providers in order and stops at the first
//!   success; missing credentials skip a provider without cost
//! - Pipelines are validated before they run and halt at the first failing
//!   step, returning partial outputs
//! - The last direct generation per capability is kept for iteration
//!
//! # Modules
//!
//! - `adapters`: Provider backends (HTTP APIs and subprocesses)
//! - `core`: Ledger, chains, catalog, detector, executor, iteration, engine
//! - `domain`: Data structures (Capability, CapabilityRequest, PipelineRun)
//! - `config`: Configuration and credentials
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Which pipeline fits a request?
//! capflow detect "um post pro instagram do meu café"
//!
//! # Run it
//! capflow run content-pack --set product="artisan coffee"
//!
//! # Generate directly, then refine
//! capflow generate image-gen "a cozy cafe at dawn"
//! capflow iterate image-gen "darker background"
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use crate::core::{Catalog, Detection, Engine, PipelineDefinition, ProviderChain, SpendLedger};
pub use domain::{Capability, CapabilityRequest, PipelineRun, ProviderKind, ProviderOutput, RunStatus};
pub use error::{EngineError, ProviderFailure};
