//! Pipeline definitions and loading.
//!
//! A pipeline is an ordered list of capability steps. Each step reads its
//! input from the initial context or from an earlier step's output and stores
//! its own output under a declared key. Pipelines are validated before they
//! run: a step may only read outputs produced by steps before it.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::Capability;
use crate::error::EngineError;

const CONTEXT_PREFIX: &str = "context.";
const GENERATED_PREFIX: &str = "generated.";

/// Where a step input or config value comes from
///
/// Supports multiple YAML formats:
/// - Context path: `input: context.product` (dotted paths walk nested objects)
/// - Generated output: `input: generated.copy`
/// - Several references: `input: [generated.video_clips, generated.voiceover]`
/// - Literal: any other scalar, or `{ literal: ... }` to force a literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRef", into = "RawRef")]
pub enum InputRef {
    Literal(Value),
    Context(String),
    Generated(String),
    All(Vec<InputRef>),
}

impl InputRef {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn context(path: impl Into<String>) -> Self {
        Self::Context(path.into())
    }

    pub fn generated(key: impl Into<String>) -> Self {
        Self::Generated(key.into())
    }

    /// Key used when this reference is part of a multi-input object
    fn key(&self, index: usize) -> String {
        match self {
            Self::Context(path) => path.clone(),
            Self::Generated(key) => key.clone(),
            Self::Literal(_) | Self::All(_) => index.to_string(),
        }
    }

    /// A name two entries of a multi-input would both be stored under
    fn duplicate_key(&self) -> Option<String> {
        let Self::All(refs) = self else {
            return None;
        };

        let mut seen = HashSet::new();
        refs.iter().enumerate().find_map(|(i, r)| {
            let key = r.key(i);
            if seen.insert(key.clone()) {
                r.duplicate_key()
            } else {
                Some(key)
            }
        })
    }

    /// Every generated key this reference reads
    pub fn generated_keys(&self) -> Vec<&str> {
        match self {
            Self::Generated(key) => vec![key.as_str()],
            Self::All(refs) => refs.iter().flat_map(InputRef::generated_keys).collect(),
            _ => Vec::new(),
        }
    }

    /// Every context path this reference reads
    pub fn context_paths(&self) -> Vec<&str> {
        match self {
            Self::Context(path) => vec![path.as_str()],
            Self::All(refs) => refs.iter().flat_map(InputRef::context_paths).collect(),
            _ => Vec::new(),
        }
    }

    /// Display form, as written in YAML
    pub fn describe(&self) -> String {
        match self {
            Self::Literal(Value::String(s)) => s.clone(),
            Self::Literal(value) => value.to_string(),
            Self::Context(path) => format!("{}{}", CONTEXT_PREFIX, path),
            Self::Generated(key) => format!("{}{}", GENERATED_PREFIX, key),
            Self::All(refs) => format!(
                "[{}]",
                refs.iter().map(InputRef::describe).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// Wire form of [`InputRef`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawRef {
    Tagged { literal: Value },
    List(Vec<RawRef>),
    Text(String),
    Other(Value),
}

impl From<RawRef> for InputRef {
    fn from(raw: RawRef) -> Self {
        match raw {
            RawRef::Tagged { literal } => Self::Literal(literal),
            RawRef::List(items) => Self::All(items.into_iter().map(Self::from).collect()),
            RawRef::Text(text) => {
                if let Some(path) = text.strip_prefix(CONTEXT_PREFIX) {
                    Self::Context(path.to_string())
                } else if let Some(key) = text.strip_prefix(GENERATED_PREFIX) {
                    Self::Generated(key.to_string())
                } else {
                    Self::Literal(Value::String(text))
                }
            }
            RawRef::Other(value) => Self::Literal(value),
        }
    }
}

impl From<InputRef> for RawRef {
    fn from(reference: InputRef) -> Self {
        match reference {
            InputRef::Literal(Value::String(s))
                if s.starts_with(CONTEXT_PREFIX) || s.starts_with(GENERATED_PREFIX) =>
            {
                RawRef::Tagged {
                    literal: Value::String(s),
                }
            }
            InputRef::Literal(value @ (Value::Array(_) | Value::Object(_))) => {
                RawRef::Tagged { literal: value }
            }
            InputRef::Literal(Value::String(s)) => RawRef::Text(s),
            InputRef::Literal(value) => RawRef::Other(value),
            InputRef::Context(path) => RawRef::Text(format!("{}{}", CONTEXT_PREFIX, path)),
            InputRef::Generated(key) => RawRef::Text(format!("{}{}", GENERATED_PREFIX, key)),
            InputRef::All(refs) => RawRef::List(refs.into_iter().map(RawRef::from).collect()),
        }
    }
}

/// A reference that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Context(String),
    Generated(String),
}

/// Resolve a reference against the initial context and the outputs so far.
///
/// A multi-reference resolves to an object keyed by each reference's name
/// (context path or generated key). Validation rejects multi-references
/// whose names collide.
pub fn resolve(
    reference: &InputRef,
    context: &Map<String, Value>,
    generated: &Map<String, Value>,
) -> Result<Value, Unresolved> {
    match reference {
        InputRef::Literal(value) => Ok(value.clone()),
        InputRef::Context(path) => {
            lookup_path(context, path).ok_or_else(|| Unresolved::Context(path.clone()))
        }
        InputRef::Generated(key) => generated
            .get(key)
            .cloned()
            .ok_or_else(|| Unresolved::Generated(key.clone())),
        InputRef::All(refs) => {
            let mut object = Map::new();
            for (i, r) in refs.iter().enumerate() {
                object.insert(r.key(i), resolve(r, context, generated)?);
            }
            Ok(Value::Object(object))
        }
    }
}

/// Look up a dotted path; an exact top-level key wins over nesting
fn lookup_path(context: &Map<String, Value>, path: &str) -> Option<Value> {
    if let Some(value) = context.get(path) {
        return Some(value.clone());
    }

    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Capability to invoke
    #[serde(alias = "skill")]
    pub capability: Capability,

    /// Where the step's input comes from
    #[serde(alias = "input_from")]
    pub input: InputRef,

    /// Key the output is stored under (unique within the pipeline)
    pub output_key: String,

    /// Configuration; values may be references
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, InputRef>,
}

impl StepDefinition {
    pub fn new(capability: Capability, input: InputRef, output_key: impl Into<String>) -> Self {
        Self {
            capability,
            input,
            output_key: output_key.into(),
            config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: InputRef) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    fn references(&self) -> impl Iterator<Item = &InputRef> {
        std::iter::once(&self.input).chain(self.config.values())
    }
}

/// A complete pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name (used in CLI)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Keywords that select this pipeline from free text
    #[serde(default)]
    pub triggers: Vec<String>,

    /// Ordered list of steps to execute
    pub steps: Vec<StepDefinition>,

    /// Generated keys returned on completion
    pub final_output: Vec<String>,

    /// Static cost estimate in USD (metadata only)
    #[serde(default)]
    pub estimated_cost: f64,

    /// Static duration estimate (metadata only)
    #[serde(default)]
    pub estimated_time: String,
}

/// Several pipelines in one YAML document
#[derive(Debug, Deserialize)]
struct PipelineFile {
    pipelines: Vec<PipelineDefinition>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            triggers: Vec::new(),
            steps: Vec::new(),
            final_output: Vec::new(),
            estimated_cost: 0.0,
            estimated_time: String::new(),
        }
    }

    pub fn triggers(mut self, triggers: &[&str]) -> Self {
        self.triggers = triggers.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn final_output(mut self, keys: &[&str]) -> Self {
        self.final_output = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn estimates(mut self, cost: f64, time: impl Into<String>) -> Self {
        self.estimated_cost = cost;
        self.estimated_time = time.into();
        self
    }

    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse and validate a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let pipeline: Self =
            serde_yaml::from_str(content).context("Failed to parse pipeline YAML")?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Parse a YAML document holding either one pipeline or `pipelines: [...]`
    pub fn many_from_yaml(content: &str) -> Result<Vec<Self>> {
        let pipelines = match serde_yaml::from_str::<PipelineFile>(content) {
            Ok(file) => file.pipelines,
            Err(_) => vec![serde_yaml::from_str::<Self>(content)
                .context("Failed to parse pipeline YAML")?],
        };

        for pipeline in &pipelines {
            pipeline.validate()?;
        }
        Ok(pipelines)
    }

    fn invalid(&self, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidPipeline {
            pipeline: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("pipeline name cannot be empty"));
        }

        if self.steps.is_empty() {
            return Err(self.invalid("pipeline must have at least one step"));
        }

        if !self.estimated_cost.is_finite() || self.estimated_cost < 0.0 {
            return Err(self.invalid("estimated_cost must be a non-negative amount"));
        }

        let declared: Vec<&str> = self.steps.iter().map(|s| s.output_key.as_str()).collect();
        let mut produced: HashSet<&str> = HashSet::new();

        for (i, step) in self.steps.iter().enumerate() {
            if step.output_key.trim().is_empty() {
                return Err(self.invalid(format!("step {} has an empty output key", i + 1)));
            }

            for reference in step.references() {
                if reference.context_paths().iter().any(|p| p.is_empty()) {
                    return Err(self.invalid(format!("step {} has an empty context path", i + 1)));
                }

                if let Some(key) = reference.duplicate_key() {
                    return Err(self.invalid(format!(
                        "step {} ({}) combines two inputs named '{}'",
                        i + 1,
                        step.output_key,
                        key
                    )));
                }

                for key in reference.generated_keys() {
                    if produced.contains(key) {
                        continue;
                    }
                    let reason = if declared.contains(&key) {
                        format!(
                            "step {} ({}) reads 'generated.{}' before it is produced",
                            i + 1,
                            step.output_key,
                            key
                        )
                    } else {
                        format!(
                            "step {} ({}) reads unknown output 'generated.{}'",
                            i + 1,
                            step.output_key,
                            key
                        )
                    };
                    return Err(self.invalid(reason));
                }
            }

            if !produced.insert(step.output_key.as_str()) {
                return Err(self.invalid(format!(
                    "output key '{}' is declared more than once",
                    step.output_key
                )));
            }
        }

        for key in &self.final_output {
            if !produced.contains(key.as_str()) {
                return Err(self.invalid(format!("final output '{}' is never produced", key)));
            }
        }

        Ok(())
    }

    /// Context paths the step inputs need, in first-use order
    pub fn context_required(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .flat_map(|s| s.input.context_paths())
            .filter(|p| seen.insert(*p))
            .map(str::to_string)
            .collect()
    }

    /// Capabilities in step order
    pub fn capabilities(&self) -> Vec<Capability> {
        self.steps.iter().map(|s| s.capability).collect()
    }
}
