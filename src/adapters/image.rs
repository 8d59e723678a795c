//! Image generation backends: Pexels stock photos, Gemini Imagen, DALL-E 3.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{download, json_body, write_bytes};
use super::{require_secret, Backend};
use crate::core::ledger::unit_price;
use crate::domain::{CapabilityRequest, ProviderOutput};

const PEXELS_URL: &str = "https://api.pexels.com";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_URL: &str = "https://api.openai.com";

const IMAGEN_MODEL: &str = "imagen-4.0-generate-001";

/// Free stock photo search (not AI generated)
pub struct PexelsPhotoBackend {
    client: reqwest::Client,
    base_url: String,
}

impl PexelsPhotoBackend {
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
impl Backend for PexelsPhotoBackend {
    fn name(&self) -> &str {
        "pexels"
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name(), secret)?;
        let query = request.prompt();

        let response = self
            .client
            .get(format!("{}/v1/search", self.base_url))
            .header("Authorization", api_key)
            .query(&[
                ("query", query.as_str()),
                ("per_page", "1"),
                ("orientation", "square"),
            ])
            .send()
            .await
            .context("Failed to reach Pexels")?;
        let data = json_body("Pexels", response).await?;

        let photo = data["photos"]
            .get(0)
            .with_context(|| format!("Pexels: no results for '{}'", query))?;
        let url = photo["src"]["large2x"]
            .as_str()
            .context("Pexels result has no image URL")?;

        let path = request.output_file("jpg")?;
        download(&self.client, url, &path).await?;
        debug!(path = %path.display(), "Downloaded stock photo");

        Ok(ProviderOutput::located(path.display().to_string())
            .with_note("Stock image from Pexels (not AI generated)")
            .with_raw(json!({"photo_id": photo["id"], "source": url})))
    }
}

/// Google Imagen via the Gemini API
pub struct ImagenBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ImagenBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: GEMINI_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Backend for ImagenBackend {
    fn name(&self) -> &str {
        "gemini_imagen"
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name(), secret)?;
        let aspect_ratio = request.config_str("aspect_ratio").unwrap_or("1:1");

        let payload = json!({
            "instances": [{"prompt": request.annotated_prompt()}],
            "parameters": {"sampleCount": 1, "aspectRatio": aspect_ratio},
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:predict",
                self.base_url, IMAGEN_MODEL
            ))
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .await
            .context("Failed to reach Imagen")?;
        let data = json_body("Imagen", response).await?;

        let encoded = data["predictions"]
            .get(0)
            .and_then(|p| p["bytesBase64Encoded"].as_str())
            .context("Imagen returned no image data")?;

        let path = request.output_file("png")?;
        write_bytes(&path, &decode_image(encoded)?).await?;

        Ok(ProviderOutput::located(path.display().to_string())
            .with_raw(json!({"model": IMAGEN_MODEL})))
    }
}

/// OpenAI DALL-E 3
pub struct DalleBackend {
    client: reqwest::Client,
    base_url: String,
}

impl DalleBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: OPENAI_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Backend for DalleBackend {
    fn name(&self) -> &str {
        "dalle3"
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name(), secret)?;
        let quality = match request.config_str("quality") {
            Some("hd") => "hd",
            _ => "standard",
        };

        let payload = json!({
            "model": "dall-e-3",
            "prompt": request.annotated_prompt(),
            "n": 1,
            "size": "1024x1024",
            "quality": quality,
            "response_format": "b64_json",
        });

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach OpenAI images")?;
        let data = json_body("DALL-E", response).await?;

        let encoded = data["data"]
            .get(0)
            .and_then(|d| d["b64_json"].as_str())
            .context("DALL-E returned no image data")?;

        let path = request.output_file("png")?;
        write_bytes(&path, &decode_image(encoded)?).await?;

        let mut output = ProviderOutput::located(path.display().to_string()).with_raw(json!({
            "quality": quality,
            "revised_prompt": data["data"][0].get("revised_prompt").cloned().unwrap_or(Value::Null),
        }));
        if let Some(price) = unit_price(&format!("dalle3_{}_1024", quality)) {
            output = output.with_cost(price);
        }
        Ok(output)
    }
}

fn decode_image(encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("Image payload is not valid base64")
}
