//! Command-line interface for capflow.
//!
//! Every command prints a JSON document on stdout so that an agent can
//! consume it directly. Structured engine failures are printed the same way
//! and exit with status 1.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

use crate::config::{self, ResolvedConfig};
use crate::core::{Engine, GenerateOptions, RunOptions};
use crate::domain::Capability;
use crate::error::EngineError;

/// capflow - capability composition and fallback engine
#[derive(Parser, Debug)]
#[command(name = "capflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .capflow/config.yaml in this or a parent directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available pipelines
    Pipelines,

    /// Detect which pipeline fits a request
    Detect {
        /// Free-text request
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Run a pipeline
    Run {
        /// Pipeline name
        pipeline: String,

        /// Context as a JSON object
        #[arg(long)]
        context: Option<String>,

        /// Context JSON file ("-" reads stdin)
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Context value as key=value (repeatable; value parsed as JSON when possible)
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Run directory (reuse one to skip completed steps)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Show the plan without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Invoke a capability directly
    Generate {
        /// Capability (image-gen, copywriter, tts, video-gen, deploy-page, montage)
        capability: String,

        /// Input prompt (reads stdin when omitted)
        prompt: Vec<String>,

        /// Configuration value as key=value (repeatable)
        #[arg(short = 'c', long = "config-value", value_name = "KEY=VALUE")]
        values: Vec<String>,

        #[command(flatten)]
        invoke: InvokeArgs,
    },

    /// Adjust the last generation of a capability
    Iterate {
        /// Capability to iterate on
        capability: String,

        /// Adjustment to apply
        #[arg(required = true, num_args = 1..)]
        adjustment: Vec<String>,

        #[command(flatten)]
        invoke: InvokeArgs,
    },

    /// Show spending
    Cost {
        /// Number of recent entries to list
        #[arg(short, long, default_value = "10")]
        last: usize,

        /// Check an operation against a budget instead
        #[arg(long)]
        check: Option<String>,

        /// Number of units for --check
        #[arg(long, default_value = "1")]
        count: u32,

        /// Budget for --check (defaults to the configured limit)
        #[arg(long)]
        limit: Option<f64>,
    },

    /// Show resolved configuration and provider availability
    Config,
}

/// Options shared by generate and iterate
#[derive(clap::Args, Debug)]
pub struct InvokeArgs {
    /// Use only this provider
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Show what would happen without invoking anything
    #[arg(long)]
    pub dry_run: bool,

    /// Budget in USD (defaults to the configured limit)
    #[arg(long)]
    pub budget: Option<f64>,

    /// Output file base (extension is added by the provider)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InvokeArgs {
    fn options(self, config: &ResolvedConfig) -> GenerateOptions {
        GenerateOptions {
            provider: self.provider,
            dry_run: self.dry_run,
            budget_limit: Some(self.budget.unwrap_or(config.budget_limit)),
            output_path: self.output,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = match self.config {
            Some(ref path) => config::load_from(Some(path.as_path()))?,
            None => config::config()?.clone(),
        };

        let engine = Engine::from_config(config).await?;
        match dispatch(&engine, self.command).await {
            Ok(output) => {
                print_json(&output)?;
                Ok(())
            }
            Err(EngineError::Storage(e)) => Err(e),
            Err(e) => {
                print_json(&failure(&e))?;
                std::process::exit(1);
            }
        }
    }
}

async fn dispatch(engine: &Engine, command: Commands) -> Result<Value, EngineError> {
    match command {
        Commands::Pipelines => Ok(list_pipelines(engine)),
        Commands::Detect { text } => Ok(engine.detect(&text.join(" ")).report()),
        Commands::Run {
            pipeline,
            context,
            context_file,
            set,
            output_dir,
            dry_run,
        } => {
            let options = RunOptions { output_dir };
            if dry_run {
                let plan = engine.plan_pipeline(&pipeline, &options)?;
                return Ok(json!({"dry_run": true, "plan": plan}));
            }

            let context = build_context(context, context_file, &set)?;
            let run = engine.run_pipeline(&pipeline, context, options).await?;
            let mut report = to_json(&run)?;
            if let (Some(error), Some(fields)) = (run.error(), report.as_object_mut()) {
                fields.insert("error".to_string(), Value::String(error));
            }
            if run.is_failed() {
                print_json(&report)?;
                std::process::exit(1);
            }
            Ok(report)
        }
        Commands::Generate {
            capability,
            prompt,
            values,
            invoke,
        } => {
            let capability: Capability = capability.parse()?;
            let input = if prompt.is_empty() {
                read_stdin()?
            } else {
                prompt.join(" ")
            };
            let config = parse_assignments(&values)?;
            let options = invoke.options(engine.config());

            let generation = engine
                .generate(capability, Value::String(input), config, options)
                .await?;
            Ok(to_json(&generation)?)
        }
        Commands::Iterate {
            capability,
            adjustment,
            invoke,
        } => {
            let capability: Capability = capability.parse()?;
            let options = invoke.options(engine.config());

            let generation = engine
                .iterate(capability, &adjustment.join(" "), options)
                .await?;
            Ok(to_json(&generation)?)
        }
        Commands::Cost {
            last,
            check,
            count,
            limit,
        } => {
            let ledger = engine.ledger();
            if let Some(operation) = check {
                let limit = limit.unwrap_or(engine.config().budget_limit);
                return Ok(to_json(&ledger.check_budget(&operation, count, limit))?);
            }

            Ok(json!({
                "summary": ledger.summary().await?,
                "today": ledger.today_total().await?,
                "total": ledger.total().await?,
                "recent": ledger.last_n(last).await?,
                "log": ledger.log_path(),
            }))
        }
        Commands::Config => Ok(show_config(engine)),
    }
}

fn list_pipelines(engine: &Engine) -> Value {
    let pipelines: Vec<Value> = engine
        .catalog()
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "description": p.description,
                "steps": p.capabilities(),
                "triggers": p.triggers,
                "context_required": p.context_required(),
                "estimated_cost": p.estimated_cost,
                "estimated_time": p.estimated_time,
            })
        })
        .collect();
    json!({ "pipelines": pipelines })
}

/// Context from --context, --context-file and --set (later sources win)
fn build_context(
    inline: Option<String>,
    file: Option<PathBuf>,
    assignments: &[String],
) -> Result<Map<String, Value>> {
    let mut context = Map::new();

    if let Some(path) = file {
        let content = if path.as_os_str() == "-" {
            read_stdin()?
        } else {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read context file: {}", path.display()))?
        };
        context.extend(parse_object(&content)?);
    }
    if let Some(inline) = inline {
        context.extend(parse_object(&inline)?);
    }
    context.extend(parse_assignments(assignments)?);

    Ok(context)
}

fn parse_object(content: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(content).context("Context is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Context must be a JSON object, got {}", other),
    }
}

/// Parse `key=value` pairs; values that are valid JSON keep their type
fn parse_assignments(assignments: &[String]) -> Result<Map<String, Value>> {
    assignments
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer.trim().to_string())
}

/// JSON report for a structured failure
fn failure(error: &EngineError) -> Value {
    let mut report = json!({"success": false, "error": error.to_string()});
    let details = match error {
        EngineError::UnknownPipeline { available, .. }
        | EngineError::UnknownCapability { available, .. }
        | EngineError::UnknownProvider { available, .. } => json!({ "available": available }),
        EngineError::ChainExhausted { failures, .. } => json!({ "failures": failures }),
        EngineError::OverBudget { estimated, limit } => {
            json!({ "estimated": estimated, "limit": limit })
        }
        _ => Value::Null,
    };
    if let (Some(fields), Value::Object(details)) = (report.as_object_mut(), details) {
        fields.extend(details);
    }
    report
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize output")
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

/// Resolved configuration and provider availability
fn show_config(engine: &Engine) -> Value {
    let config = engine.config();
    let credentials = engine.credentials();

    let providers: Map<String, Value> = Capability::ALL
        .iter()
        .map(|capability| {
            let chain: Vec<Value> = config
                .providers_for(*capability)
                .into_iter()
                .map(|kind| {
                    let present = kind.credential().map_or(true, |var| credentials.get(var).is_some());
                    json!({
                        "name": kind.name(),
                        "operation": kind.operation(),
                        "credential": kind.credential(),
                        "credential_present": present,
                    })
                })
                .collect();
            (capability.to_string(), Value::Array(chain))
        })
        .collect();

    json!({
        "config_file": config.config_file,
        "home": config.home,
        "output": config.output,
        "ledger": config.ledger_path(),
        "iteration": config.iteration_dir(),
        "budget_limit": config.budget_limit,
        "provider_timeout_seconds": config.provider_timeout.as_secs(),
        "pipelines_file": config.pipelines_file,
        "commands": {
            "deploy": config.deploy_command,
            "montage": config.montage_command,
        },
        "credentials": credentials.present(),
        "pipelines": engine.catalog().names(),
        "providers": providers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignments_keep_json_types() {
        let parsed = parse_assignments(&[
            "product=artisan coffee".to_string(),
            "count=5".to_string(),
            "tags=[\"a\",\"b\"]".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed["product"], json!("artisan coffee"));
        assert_eq!(parsed["count"], json!(5));
        assert_eq!(parsed["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_assignment_without_equals_is_rejected() {
        assert!(parse_assignments(&["product".to_string()]).is_err());
    }

    #[test]
    fn test_inline_context_and_assignments_merge() {
        let context = build_context(
            Some(r#"{"product": "tea", "platform": "instagram"}"#.to_string()),
            None,
            &["product=coffee".to_string()],
        )
        .unwrap();
        assert_eq!(context["product"], json!("coffee"));
        assert_eq!(context["platform"], json!("instagram"));
    }

    #[test]
    fn test_failure_report_lists_alternatives() {
        let report = failure(&EngineError::UnknownPipeline {
            name: "podcast".to_string(),
            available: vec!["content-pack".to_string()],
        });
        assert_eq!(report["success"], false);
        assert_eq!(report["available"], json!(["content-pack"]));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "capflow", "run", "content-pack", "--set", "product=coffee", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { pipeline, set, dry_run, .. } => {
                assert_eq!(pipeline, "content-pack");
                assert_eq!(set, ["product=coffee"]);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
