//! Structured errors returned by the engine.
//!
//! Nothing here is fatal to the process: every variant is handed back to the
//! caller (CLI or a higher-level agent), which decides whether to retry,
//! degrade, or report. Variants that concern an unknown name always carry the
//! valid alternatives.

use serde::Serialize;
use thiserror::Error;

use crate::domain::Capability;

/// Why a single provider in a chain did not produce a result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderFailure {
    /// Provider name
    pub provider: String,

    /// Human-readable failure reason
    pub reason: String,

    /// True when the provider was never invoked (missing credential or command)
    pub skipped: bool,
}

impl ProviderFailure {
    pub fn failed(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
            skipped: false,
        }
    }

    pub fn skipped(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
            skipped: true,
        }
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped {
            write!(f, "{}: skipped ({})", self.provider, self.reason)
        } else {
            write!(f, "{}: {}", self.provider, self.reason)
        }
    }
}

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown pipeline '{name}'. Available: {}", .available.join(", "))]
    UnknownPipeline { name: String, available: Vec<String> },

    #[error("Unknown capability '{name}'. Available: {}", .available.join(", "))]
    UnknownCapability { name: String, available: Vec<String> },

    #[error("Unknown provider '{name}' for {capability}. Available: {}", .available.join(", "))]
    UnknownProvider {
        name: String,
        capability: Capability,
        available: Vec<String>,
    },

    #[error("Provider '{name}' appears more than once in the {capability} chain")]
    DuplicateProvider { name: String, capability: Capability },

    #[error("Invalid pipeline '{pipeline}': {reason}")]
    InvalidPipeline { pipeline: String, reason: String },

    #[error("Pipeline '{pipeline}' needs context value '{path}'")]
    MissingContext { pipeline: String, path: String },

    #[error("All {capability} providers failed: {}", format_failures(.failures))]
    ChainExhausted {
        capability: Capability,
        failures: Vec<ProviderFailure>,
    },

    #[error("Estimated cost ${estimated:.2} exceeds budget ${limit:.2}")]
    OverBudget { estimated: f64, limit: f64 },

    #[error("No previous {capability} generation to iterate on")]
    NothingToIterate { capability: Capability },

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
