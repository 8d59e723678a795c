//! Text-to-speech backends: Edge TTS (local subprocess) and ElevenLabs.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use super::http::{ensure_success, write_bytes};
use super::{require_secret, Backend};
use crate::core::ledger::unit_price;
use crate::domain::{CapabilityRequest, ProviderOutput};

const ELEVENLABS_URL: &str = "https://api.elevenlabs.io";

/// Voice selection and delivery settings for a narration style
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceProfile {
    pub style: &'static str,
    pub edge_voice: &'static str,
    pub elevenlabs_voice: &'static str,
    pub stability: f64,
    pub similarity: f64,
    pub expressiveness: f64,
}

pub const VOICE_PROFILES: &[VoiceProfile] = &[
    VoiceProfile {
        style: "narrator",
        edge_voice: "pt-BR-AntonioNeural",
        elevenlabs_voice: "onwK4e9ZLuTAKqWW03F9",
        stability: 0.7,
        similarity: 0.8,
        expressiveness: 0.3,
    },
    VoiceProfile {
        style: "energetic",
        edge_voice: "pt-BR-FranciscaNeural",
        elevenlabs_voice: "EXAVITQu4vr4xnSDxMaL",
        stability: 0.5,
        similarity: 0.75,
        expressiveness: 0.6,
    },
    VoiceProfile {
        style: "calm",
        edge_voice: "pt-BR-AntonioNeural",
        elevenlabs_voice: "pNInz6obpgDQGcFmaJgB",
        stability: 0.9,
        similarity: 0.85,
        expressiveness: 0.1,
    },
    VoiceProfile {
        style: "conversational",
        edge_voice: "pt-BR-AntonioNeural",
        elevenlabs_voice: "TxGEqnHWrfWFTfGW9XjX",
        stability: 0.6,
        similarity: 0.7,
        expressiveness: 0.4,
    },
    VoiceProfile {
        style: "urgent",
        edge_voice: "pt-BR-FranciscaNeural",
        elevenlabs_voice: "EXAVITQu4vr4xnSDxMaL",
        stability: 0.4,
        similarity: 0.8,
        expressiveness: 0.7,
    },
];

/// Profile for the request's `voice_style` (narrator when unset or unknown)
pub fn voice_profile(request: &CapabilityRequest) -> &'static VoiceProfile {
    let style = request.config_str("voice_style").unwrap_or("narrator");
    VOICE_PROFILES
        .iter()
        .find(|p| p.style == style)
        .unwrap_or(&VOICE_PROFILES[0])
}

/// Free local synthesis through the `edge-tts` CLI
pub struct EdgeTtsBackend {
    binary_path: String,
}

impl Default for EdgeTtsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeTtsBackend {
    pub fn new() -> Self {
        Self {
            binary_path: "edge-tts".to_string(),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl Backend for EdgeTtsBackend {
    fn name(&self) -> &str {
        "edge_tts"
    }

    async fn invoke(&self, request: &CapabilityRequest, _secret: Option<&str>) -> Result<ProviderOutput> {
        let text = request.prompt();
        let voice = request
            .config_str("voice")
            .unwrap_or(voice_profile(request).edge_voice);
        let path = request.output_file("mp3")?;

        let output = Command::new(&self.binary_path)
            .arg("--voice")
            .arg(voice)
            .arg("--text")
            .arg(&text)
            .arg("--write-media")
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "edge-tts failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        if !path.exists() {
            anyhow::bail!("edge-tts exited cleanly but wrote no audio");
        }

        Ok(ProviderOutput::located(path.display().to_string())
            .with_raw(json!({"voice": voice, "chars": text.chars().count()})))
    }
}

/// Premium synthesis through the ElevenLabs API
pub struct ElevenLabsBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ElevenLabsBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: ELEVENLABS_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Backend for ElevenLabsBackend {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>) -> Result<ProviderOutput> {
        let api_key = require_secret(self.name(), secret)?;
        let text = request.prompt();
        let profile = voice_profile(request);
        let voice_id = request.config_str("voice").unwrap_or(profile.elevenlabs_voice);

        let payload = json!({
            "text": text,
            "model_id": "eleven_multilingual_v2",
            "voice_settings": {
                "stability": profile.stability,
                "similarity_boost": profile.similarity,
                "style": profile.expressiveness,
            },
        });

        let response = self
            .client
            .post(format!("{}/v1/text-to-speech/{}", self.base_url, voice_id))
            .header("xi-api-key", api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach ElevenLabs")?;
        let audio = ensure_success("ElevenLabs", response)
            .await?
            .bytes()
            .await
            .context("Failed to read ElevenLabs audio")?;

        let path = request.output_file("mp3")?;
        write_bytes(&path, &audio).await?;

        // Billed per character, not per started thousand
        let chars = text.chars().count();
        let cost = chars as f64 / 1000.0 * unit_price("elevenlabs").unwrap_or(0.0);

        Ok(ProviderOutput::located(path.display().to_string())
            .with_cost(cost)
            .with_raw(json!({"voice_id": voice_id, "chars": chars})))
    }
}
