//! External command backend.
//!
//! Used for capabilities the engine delegates to local tooling (page
//! deployment, video montage). The request is written to the program's stdin
//! as JSON; stdout is parsed best-effort as a JSON reply.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::reply::parse_json_or;
use super::Backend;
use crate::domain::{CapabilityRequest, ProviderOutput};

/// Runs a configured program once per invocation
pub struct CommandBackend {
    name: String,

    /// Program and arguments, whitespace separated; none means not configured
    command: Option<String>,
}

impl CommandBackend {
    pub fn new(name: impl Into<String>, command: Option<String>) -> Self {
        Self {
            name: name.into(),
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }

    async fn execute(&self, command: &str, request: &CapabilityRequest) -> Result<Value> {
        let mut parts = command.split_whitespace();
        let program = parts.next().context("Empty command")?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for {}", program, self.name))?;

        let payload = serde_json::to_vec(request).context("Failed to serialize request")?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .with_context(|| format!("Failed to write to '{}' stdin", program))?;
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for '{}'", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "'{}' failed with exit code {}: {}",
                program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Command output is not valid UTF-8")?;
        let path = request
            .output_path
            .as_ref()
            .map(|p| p.display().to_string());

        Ok(parse_json_or(
            &stdout,
            json!({"output": stdout.trim(), "path": path}),
        ))
    }
}

#[async_trait]
impl Backend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.command.is_some()
    }

    async fn invoke(&self, request: &CapabilityRequest, _secret: Option<&str>) -> Result<ProviderOutput> {
        let command = self
            .command
            .as_deref()
            .with_context(|| format!("No command configured for {}", self.name))?;

        let reply = self.execute(command, request).await?;
        into_output(reply)
    }
}

/// Map a command reply onto a provider output
fn into_output(reply: Value) -> Result<ProviderOutput> {
    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        anyhow::bail!("{}", message);
    }

    let text = |key: &str| {
        reply
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(ProviderOutput {
        artifact: text("output"),
        location: text("url").or_else(|| text("path")),
        cost: reply.get("cost").and_then(Value::as_f64),
        note: text("note"),
        raw: reply.clone(),
    })
}
