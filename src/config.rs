//! Configuration for capflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CAPFLOW_HOME, CAPFLOW_OUTPUT)
//! 2. Config file (.capflow/config.yaml)
//! 3. Defaults (~/.capflow, ./output)
//!
//! Config file discovery:
//! - Searches current directory and parents for .capflow/config.yaml
//! - `paths.home` is relative to the .capflow/ directory; every other path is
//!   relative to the project root (the parent of .capflow/)

pub mod credentials;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Deserialize;

use crate::domain::{Capability, ProviderKind};
use crate::error::EngineError;

pub use credentials::Credentials;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_BUDGET_LIMIT: f64 = 1.00;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 120;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub budget: Option<BudgetConfig>,
    #[serde(default)]
    pub timeouts: Option<TimeoutsConfig>,
    /// Provider order override per capability
    #[serde(default)]
    pub providers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub commands: CommandsConfig,
    /// Extra YAML pipelines appended to the built-in catalog
    #[serde(default)]
    pub pipelines_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .capflow/)
    pub home: Option<String>,
    /// Root for pipeline run output (relative to the project root)
    pub output: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    pub default_limit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    pub provider_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandsConfig {
    pub deploy: Option<String>,
    pub montage: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (ledger, iteration slots, .env)
    pub home: PathBuf,
    /// Root for pipeline run output
    pub output: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Default budget limit in USD
    pub budget_limit: f64,
    /// Per-call provider timeout
    pub provider_timeout: Duration,
    /// Provider order overrides
    pub provider_order: HashMap<Capability, Vec<ProviderKind>>,
    pub deploy_command: Option<String>,
    pub montage_command: Option<String>,
    pub pipelines_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Defaults rooted at a given home (no config file)
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            output: home.join("output"),
            home,
            config_file: None,
            budget_limit: DEFAULT_BUDGET_LIMIT,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            provider_order: HashMap::new(),
            deploy_command: None,
            montage_command: None,
            pipelines_file: None,
        }
    }

    /// Spend ledger file ($CAPFLOW_HOME/cost_log.jsonl)
    pub fn ledger_path(&self) -> PathBuf {
        self.home.join("cost_log.jsonl")
    }

    /// Iteration slot directory ($CAPFLOW_HOME/iteration)
    pub fn iteration_dir(&self) -> PathBuf {
        self.home.join("iteration")
    }

    /// Fresh output directory for a pipeline run: output/<pipeline>_<timestamp>
    pub fn run_output_dir(&self, pipeline: &str) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        self.output.join(format!("{}_{}", pipeline, timestamp))
    }

    /// Output file base for a direct capability invocation
    pub fn generation_output(&self, capability: Capability) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        self.output
            .join(capability.domain())
            .join(format!("{}_{}", capability.domain(), timestamp))
    }

    /// Provider order for a capability (override, else the default chain)
    pub fn providers_for(&self, capability: Capability) -> Vec<ProviderKind> {
        self.provider_order
            .get(&capability)
            .cloned()
            .unwrap_or_else(|| capability.default_providers().to_vec())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".capflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Validate provider order overrides against the closed registries
fn parse_provider_order(
    raw: &HashMap<String, Vec<String>>,
) -> Result<HashMap<Capability, Vec<ProviderKind>>> {
    let mut order = HashMap::new();

    for (key, names) in raw {
        let capability: Capability = key.parse()?;
        let available: Vec<String> = capability
            .default_providers()
            .iter()
            .map(|k| k.name().to_string())
            .collect();

        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let kind = ProviderKind::from_name(name)
                .filter(|k| k.capability() == capability)
                .ok_or_else(|| EngineError::UnknownProvider {
                    name: name.clone(),
                    capability,
                    available: available.clone(),
                })?;
            if kinds.contains(&kind) {
                return Err(EngineError::DuplicateProvider {
                    name: name.clone(),
                    capability,
                }
                .into());
            }
            kinds.push(kind);
        }

        order.insert(capability, kinds);
    }

    Ok(order)
}

/// Load configuration, optionally from an explicit config file
pub fn load_from(config_file: Option<&Path>) -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".capflow");

    let mut resolved = ResolvedConfig::with_home(default_home);
    resolved.output = PathBuf::from("output");

    if let Some(config_path) = config_file {
        let config = load_config_file(config_path)?;

        // .capflow/ and the project root around it
        let capflow_dir = config_path.parent().unwrap_or(Path::new("."));
        let base_dir = capflow_dir.parent().unwrap_or(Path::new("."));

        if let Some(ref home) = config.paths.home {
            resolved.home = resolve_path(capflow_dir, home);
        }
        resolved.output = match config.paths.output {
            Some(ref output) => resolve_path(base_dir, output),
            None => base_dir.join("output"),
        };

        if let Some(limit) = config.budget.as_ref().and_then(|b| b.default_limit) {
            if !limit.is_finite() || limit < 0.0 {
                anyhow::bail!("budget.default_limit must be a non-negative amount, got {}", limit);
            }
            resolved.budget_limit = limit;
        }
        if let Some(secs) = config.timeouts.as_ref().and_then(|t| t.provider_seconds) {
            resolved.provider_timeout = Duration::from_secs(secs.max(1));
        }

        resolved.provider_order = parse_provider_order(&config.providers)
            .with_context(|| format!("Invalid providers section in {}", config_path.display()))?;
        resolved.deploy_command = config.commands.deploy;
        resolved.montage_command = config.commands.montage;
        resolved.pipelines_file = config
            .pipelines_file
            .as_deref()
            .map(|p| resolve_path(base_dir, p));
        resolved.config_file = Some(config_path.to_path_buf());
    }

    // Environment wins over the file
    if let Ok(env_home) = std::env::var("CAPFLOW_HOME") {
        resolved.home = PathBuf::from(env_home);
    }
    if let Ok(env_output) = std::env::var("CAPFLOW_OUTPUT") {
        resolved.output = PathBuf::from(env_output);
    }

    Ok(resolved)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    load_from(find_config_file().as_deref())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
