//! Video backends: Pexels stock footage and Kling image-to-video via Fal.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{download, json_body};
use super::{require_secret, Backend};
use crate::domain::{CapabilityRequest, ProviderOutput};

const PEXELS_URL: &str = "https://api.pexels.com";
const FAL_QUEUE_URL: &str = "https://queue.fal.run";
const KLING_APP: &str = "fal-ai/kling-video";
const KLING_ENDPOINT: &str = "v1.6/standard/image-to-video";

/// Fal bills Kling per generated second
const KLING_PRICE_PER_SECOND: f64 = 0.09;

/// Free stock footage search
pub struct PexelsVideoBackend {
    client: reqwest::Client,
    base_url: String,
}

impl PexelsVideoBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: PEXELS_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Backend for PexelsVideoBackend {
    fn name(&self) -> &str {
        "pexels_video"
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name(), secret)?;
        let query = request
            .config_text("query")
            .unwrap_or_else(|| request.prompt());

        let response = self
            .client
            .get(format!("{}/videos/search", self.base_url))
            .header("Authorization", api_key)
            .query(&[("query", query.as_str()), ("per_page", "1")])
            .send()
            .await
            .context("Failed to reach Pexels")?;
        let data = json_body("Pexels", response).await?;

        let files = data["videos"]
            .get(0)
            .and_then(|v| v["video_files"].as_array())
            .filter(|files| !files.is_empty())
            .with_context(|| format!("Pexels: no videos for '{}'", query))?;
        let file = files
            .iter()
            .find(|f| f["quality"] == "hd")
            .unwrap_or(&files[0]);
        let link = file["link"]
            .as_str()
            .context("Pexels video file has no link")?;

        let path = request.output_file("mp4")?;
        download(&self.client, link, &path).await?;

        Ok(ProviderOutput::located(path.display().to_string())
            .with_note("Stock footage from Pexels (not AI generated)")
            .with_raw(json!({"source": link, "quality": file["quality"]})))
    }
}

/// Kling image-to-video through the Fal queue API
pub struct KlingFalBackend {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl KlingFalBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: FAL_QUEUE_URL.to_string(),
            poll_interval: Duration::from_secs(5),
            max_polls: 60,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn get_json(&self, url: &str, api_key: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Key {}", api_key))
            .send()
            .await
            .context("Failed to reach Fal")?;
        json_body("Fal", response).await
    }

    /// Poll until the job completes and return the video URL
    async fn wait_for_video(&self, request_id: &str, api_key: &str) -> Result<String> {
        let request_url = format!("{}/{}/requests/{}", self.base_url, KLING_APP, request_id);
        let status_url = format!("{}/status", request_url);

        for attempt in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let status = self.get_json(&status_url, api_key).await?;
            match status["status"].as_str() {
                Some("COMPLETED") => {
                    if let Some(url) = status["response"]["video"]["url"].as_str() {
                        return Ok(url.to_string());
                    }
                    let result = self.get_json(&request_url, api_key).await?;
                    return result["video"]["url"]
                        .as_str()
                        .map(str::to_string)
                        .context("Kling job completed without a video URL");
                }
                Some("FAILED") | Some("ERROR") => {
                    anyhow::bail!("Kling job {} failed: {}", request_id, status);
                }
                other => {
                    debug!(attempt, status = ?other, "Kling job still running");
                }
            }
        }

        anyhow::bail!(
            "Kling job {} not finished after {} polls",
            request_id,
            self.max_polls
        )
    }
}

#[async_trait]
impl Backend for KlingFalBackend {
    fn name(&self) -> &str {
        "kling"
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name(), secret)?;
        let duration = request
            .config
            .get("duration")
            .and_then(|d| d.as_u64().or_else(|| d.as_str().and_then(|s| s.parse().ok())))
            .filter(|d| *d == 5 || *d == 10)
            .unwrap_or(5);

        // A first frame is used when the input points at an existing image
        let first_frame = first_existing_file(&request.input);
        let prompt = match first_frame {
            Some(_) => request
                .config_text("motion_prompt")
                .unwrap_or_else(|| "natural, expressive motion".to_string()),
            None => request.annotated_prompt(),
        };

        let mut payload = json!({
            "prompt": prompt,
            "duration": duration.to_string(),
            "aspect_ratio": request.config_str("aspect_ratio").unwrap_or("16:9"),
        });
        if let Some(frame) = first_frame {
            let bytes = tokio::fs::read(frame)
                .await
                .with_context(|| format!("Failed to read first frame {}", frame))?;
            payload["image_url"] = Value::String(format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ));
        }

        let response = self
            .client
            .post(format!("{}/{}/{}", self.base_url, KLING_APP, KLING_ENDPOINT))
            .header("Authorization", format!("Key {}", api_key))
            .json(&payload)
            .send()
            .await
            .context("Failed to reach Fal")?;
        let submitted = json_body("Fal", response).await?;
        let request_id = submitted["request_id"]
            .as_str()
            .context("Fal did not return a request id")?;

        let video_url = self.wait_for_video(request_id, api_key).await?;
        let path = request.output_file("mp4")?;
        download(&self.client, &video_url, &path).await?;

        Ok(ProviderOutput::located(path.display().to_string())
            .with_cost(duration as f64 * KLING_PRICE_PER_SECOND)
            .with_raw(json!({"request_id": request_id, "duration": duration})))
    }
}

fn first_existing_file(input: &Value) -> Option<&str> {
    match input {
        Value::String(s) if Path::new(s).is_file() => Some(s.as_str()),
        Value::Array(items) => items.iter().find_map(first_existing_file),
        _ => None,
    }
}
