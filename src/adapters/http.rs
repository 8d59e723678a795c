//! Shared HTTP plumbing for the REST backends.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

const USER_AGENT: &str = concat!("capflow/", env!("CARGO_PKG_VERSION"));

/// Build the client shared by every HTTP backend
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Fail with the response body when the status is not a success
pub async fn ensure_success(service: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let snippet: String = text.chars().take(300).collect();
    anyhow::bail!("{} error ({}): {}", service, status, snippet.trim())
}

/// Decode a successful JSON response
pub async fn json_body(service: &str, response: reqwest::Response) -> Result<Value> {
    ensure_success(service, response)
        .await?
        .json::<Value>()
        .await
        .with_context(|| format!("{} returned invalid JSON", service))
}

/// Download a URL to a file
pub async fn download(client: &reqwest::Client, url: &str, path: &Path) -> Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?;
    let bytes = ensure_success("download", response)
        .await?
        .bytes()
        .await
        .context("Failed to read download body")?;

    write_bytes(path, &bytes).await?;
    Ok(bytes.len() as u64)
}

/// Write bytes to a file, creating parent directories
pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
