//! Copywriting backends: Gemini (flash and pro) and OpenAI gpt-4o-mini.
//!
//! Both return the copy inline. When the request carries an output path the
//! copy is also written next to the other run artifacts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::{json_body, write_bytes};
use super::{require_secret, Backend};
use crate::domain::{CapabilityRequest, ProviderOutput};

const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_URL: &str = "https://api.openai.com";

/// USD per input and output token
#[derive(Debug, Clone, Copy)]
struct TokenRates {
    input: f64,
    output: f64,
}

impl TokenRates {
    fn cost(self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input + output_tokens as f64 * self.output
    }
}

const GEMINI_FLASH_RATES: TokenRates = TokenRates {
    input: 0.000_000_1,
    output: 0.000_000_4,
};

const OPENAI_MINI_RATES: TokenRates = TokenRates {
    input: 0.000_000_15,
    output: 0.000_000_6,
};

/// Gemini generateContent
pub struct GeminiTextBackend {
    client: reqwest::Client,
    base_url: String,
    name: &'static str,
    model: &'static str,
    rates: Option<TokenRates>,
}

impl GeminiTextBackend {
    pub fn flash(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: GEMINI_URL.to_string(),
            name: "gemini_flash",
            model: "gemini-2.0-flash",
            rates: Some(GEMINI_FLASH_RATES),
        }
    }

    /// Pro has no token rates; its cost comes from the price table
    pub fn pro(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: GEMINI_URL.to_string(),
            name: "gemini_pro",
            model: "gemini-1.5-pro",
            rates: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Backend for GeminiTextBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name, secret)?;

        let payload = json!({
            "contents": [{"parts": [{"text": brief(request)}]}],
            "generationConfig": {
                "temperature": 0.8,
                "topP": 0.9,
                "maxOutputTokens": 1024,
            },
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .await
            .context("Failed to reach Gemini")?;
        let data = json_body("Gemini", response).await?;

        let copy = data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .context("Gemini returned no text")?
            .trim()
            .to_string();

        let usage = &data["usageMetadata"];
        let tokens = (
            usage["promptTokenCount"].as_u64(),
            usage["candidatesTokenCount"].as_u64(),
        );

        finish(request, copy, self.model, self.rates, tokens).await
    }
}

/// OpenAI chat completions
pub struct OpenAiTextBackend {
    client: reqwest::Client,
    base_url: String,
    model: &'static str,
}

impl OpenAiTextBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: OPENAI_URL.to_string(),
            model: "gpt-4o-mini",
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Backend for OpenAiTextBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name(), secret)?;

        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": brief(request)}],
            "temperature": 0.8,
            "max_tokens": 1024,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach OpenAI")?;
        let data = json_body("OpenAI", response).await?;

        let copy = data["choices"][0]["message"]["content"]
            .as_str()
            .context("OpenAI returned no message")?
            .trim()
            .to_string();

        let usage = &data["usage"];
        let tokens = (
            usage["prompt_tokens"].as_u64(),
            usage["completion_tokens"].as_u64(),
        );

        finish(request, copy, self.model, Some(OPENAI_MINI_RATES), tokens).await
    }
}

/// Prompt sent to the model: the brief plus any requested copy type
fn brief(request: &CapabilityRequest) -> String {
    match request.config_text("copy_type") {
        Some(copy_type) => {
            let mut rest = request.clone();
            rest.config.remove("copy_type");
            format!("Write {} copy for: {}", copy_type, rest.annotated_prompt())
        }
        None => request.annotated_prompt(),
    }
}

async fn finish(
    request: &CapabilityRequest,
    copy: String,
    model: &str,
    rates: Option<TokenRates>,
    tokens: (Option<u64>, Option<u64>),
) -> Result<ProviderOutput> {
    let mut output = ProviderOutput::text(copy.clone());

    if request.output_path.is_some() {
        let path = request.output_file("txt")?;
        write_bytes(&path, copy.as_bytes()).await?;
        output.location = Some(path.display().to_string());
    }

    let mut raw = json!({"model": model});
    if let (Some(input), Some(out)) = tokens {
        raw["input_tokens"] = Value::from(input);
        raw["output_tokens"] = Value::from(out);
        if let Some(rates) = rates {
            output = output.with_cost(rates.cost(input, out));
        }
    }

    Ok(output.with_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Capability;

    #[test]
    fn test_token_cost() {
        let cost = OPENAI_MINI_RATES.cost(1000, 1000);
        assert!((cost - 0.00075).abs() < 1e-12);
    }

    #[test]
    fn test_brief_mentions_copy_type_once() {
        let request = CapabilityRequest::new(Capability::Text, "artisan coffee")
            .with_config("copy_type", "headline")
            .with_config("platform", "instagram");
        assert_eq!(
            brief(&request),
            "Write headline copy for: artisan coffee\n\n[platform: instagram]"
        );
    }
}
