//! Closed sets of capabilities and provider kinds.
//!
//! Every generation operation the engine knows about is a [`Capability`];
//! every concrete backend is a [`ProviderKind`] bound to exactly one
//! capability. Both are looked up by their stable string names at the edges
//! (CLI, YAML pipelines, config) and matched exhaustively everywhere else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A content-generation operation exposed behind a uniform invoke contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Produce an image for a prompt
    #[serde(rename = "image-gen")]
    Image,

    /// Produce marketing copy for a brief
    #[serde(rename = "copywriter")]
    Text,

    /// Produce narration audio for a script
    #[serde(rename = "tts")]
    Speech,

    /// Produce a short video clip
    #[serde(rename = "video-gen")]
    Video,

    /// Publish assembled page content and return a live URL
    #[serde(rename = "deploy-page")]
    Deploy,

    /// Combine clips and voiceover into a final video
    #[serde(rename = "montage")]
    Montage,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Image,
        Capability::Text,
        Capability::Speech,
        Capability::Video,
        Capability::Deploy,
        Capability::Montage,
    ];

    /// Stable name used in pipelines, config and the CLI
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image-gen",
            Self::Text => "copywriter",
            Self::Speech => "tts",
            Self::Video => "video-gen",
            Self::Deploy => "deploy-page",
            Self::Montage => "montage",
        }
    }

    /// Short domain name; one iteration slot exists per domain
    pub const fn domain(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
            Self::Speech => "speech",
            Self::Video => "video",
            Self::Deploy => "deploy",
            Self::Montage => "montage",
        }
    }

    /// Default provider order: free first, premium last
    pub const fn default_providers(self) -> &'static [ProviderKind] {
        match self {
            Self::Image => &[
                ProviderKind::PexelsPhoto,
                ProviderKind::GeminiImagen,
                ProviderKind::Dalle3,
            ],
            Self::Text => &[
                ProviderKind::GeminiFlash,
                ProviderKind::OpenAiMini,
                ProviderKind::GeminiPro,
            ],
            Self::Speech => &[ProviderKind::EdgeTts, ProviderKind::ElevenLabs],
            Self::Video => &[ProviderKind::PexelsVideo, ProviderKind::KlingFal],
            Self::Deploy => &[ProviderKind::DeployCommand],
            Self::Montage => &[ProviderKind::MontageCommand],
        }
    }

    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|c| c.as_str().to_string()).collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = EngineError;

    /// Accepts either the capability name (`image-gen`) or its domain (`image`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == needle || c.domain() == needle)
            .ok_or_else(|| EngineError::UnknownCapability {
                name: s.to_string(),
                available: Self::names(),
            })
    }
}

/// How a provider's unit price scales with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pricing {
    /// One unit per invocation
    PerCall,

    /// One unit per started thousand characters of input
    PerThousandChars,
}

impl Pricing {
    /// Number of billable units for an input of `chars` characters
    pub fn units(self, chars: usize) -> u32 {
        match self {
            Self::PerCall => 1,
            Self::PerThousandChars => chars.div_ceil(1000).max(1) as u32,
        }
    }
}

/// A concrete backend implementation of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    PexelsPhoto,
    GeminiImagen,
    Dalle3,
    GeminiFlash,
    GeminiPro,
    OpenAiMini,
    EdgeTts,
    ElevenLabs,
    PexelsVideo,
    KlingFal,
    DeployCommand,
    MontageCommand,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 12] = [
        ProviderKind::PexelsPhoto,
        ProviderKind::GeminiImagen,
        ProviderKind::Dalle3,
        ProviderKind::GeminiFlash,
        ProviderKind::GeminiPro,
        ProviderKind::OpenAiMini,
        ProviderKind::EdgeTts,
        ProviderKind::ElevenLabs,
        ProviderKind::PexelsVideo,
        ProviderKind::KlingFal,
        ProviderKind::DeployCommand,
        ProviderKind::MontageCommand,
    ];

    /// Provider name as shown to users and pinned on the CLI
    pub const fn name(self) -> &'static str {
        match self {
            Self::PexelsPhoto => "pexels",
            Self::GeminiImagen => "gemini_imagen",
            Self::Dalle3 => "dalle3",
            Self::GeminiFlash => "gemini_flash",
            Self::GeminiPro => "gemini_pro",
            Self::OpenAiMini => "openai",
            Self::EdgeTts => "edge_tts",
            Self::ElevenLabs => "elevenlabs",
            Self::PexelsVideo => "pexels_video",
            Self::KlingFal => "kling",
            Self::DeployCommand => "deploy_command",
            Self::MontageCommand => "montage_command",
        }
    }

    pub const fn capability(self) -> Capability {
        match self {
            Self::PexelsPhoto | Self::GeminiImagen | Self::Dalle3 => Capability::Image,
            Self::GeminiFlash | Self::GeminiPro | Self::OpenAiMini => Capability::Text,
            Self::EdgeTts | Self::ElevenLabs => Capability::Speech,
            Self::PexelsVideo | Self::KlingFal => Capability::Video,
            Self::DeployCommand => Capability::Deploy,
            Self::MontageCommand => Capability::Montage,
        }
    }

    /// Ledger operation this provider is priced and recorded under
    pub const fn operation(self) -> &'static str {
        match self {
            Self::PexelsPhoto => "pexels",
            Self::GeminiImagen => "gemini_imagen",
            Self::Dalle3 => "dalle3_standard_1024",
            Self::GeminiFlash => "gemini_flash_text",
            Self::GeminiPro => "gemini_pro_text",
            Self::OpenAiMini => "openai_4o_mini_text",
            Self::EdgeTts => "edge_tts",
            Self::ElevenLabs => "elevenlabs",
            Self::PexelsVideo => "pexels_video",
            Self::KlingFal => "kling_fal",
            Self::DeployCommand => "cloudflare_pages",
            Self::MontageCommand => "montage_local",
        }
    }

    pub const fn pricing(self) -> Pricing {
        match self {
            Self::ElevenLabs => Pricing::PerThousandChars,
            _ => Pricing::PerCall,
        }
    }

    /// Environment variable holding the credential, if one is needed
    pub const fn credential(self) -> Option<&'static str> {
        match self {
            Self::PexelsPhoto | Self::PexelsVideo => Some("PEXELS_API_KEY"),
            Self::GeminiImagen | Self::GeminiFlash | Self::GeminiPro => {
                Some("GOOGLE_API_KEY_GEMINI")
            }
            Self::Dalle3 | Self::OpenAiMini => Some("OPENAI_API_KEY"),
            Self::ElevenLabs => Some("ELEVENLABS_API_KEY"),
            Self::KlingFal => Some("FAL_KEY"),
            Self::EdgeTts | Self::DeployCommand | Self::MontageCommand => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let needle = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|p| p.name() == needle)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
