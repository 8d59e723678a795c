//! Domain types for the capflow engine.
//!
//! This module contains the core data structures:
//! - Capability / ProviderKind: the closed registries of operations and backends
//! - CapabilityRequest / ProviderOutput: the invoke contract
//! - CostEntry: ledger records
//! - PipelineRun: the result of one pipeline execution

pub mod artifact;
pub mod capability;
pub mod cost;
pub mod request;
pub mod run;

// Re-export commonly used types
pub use artifact::ProviderOutput;
pub use capability::{Capability, Pricing, ProviderKind};
pub use cost::{BudgetCheck, CostEntry};
pub use request::CapabilityRequest;
pub use run::{ExecutionState, PipelineRun, RunStatus, StepResult};
