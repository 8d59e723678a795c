//! Backend interfaces for external generation services.
//!
//! A backend performs one invocation of one capability. It never decides
//! whether it should be tried: credential checks, timeouts, ordering and
//! cost recording all belong to the provider chain that owns it.

pub mod command;
pub mod http;
pub mod image;
pub mod reply;
pub mod speech;
pub mod text;
pub mod video;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::domain::{CapabilityRequest, ProviderKind, ProviderOutput};

pub use command::CommandBackend;
pub use image::{DalleBackend, ImagenBackend, PexelsPhotoBackend};
pub use speech::{EdgeTtsBackend, ElevenLabsBackend};
pub use text::{GeminiTextBackend, OpenAiTextBackend};
pub use video::{KlingFalBackend, PexelsVideoBackend};

/// Trait for generation backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Whether the backend can run at all (e.g. an external command is configured)
    fn is_ready(&self) -> bool {
        true
    }

    /// Perform one invocation.
    ///
    /// `secret` is the provider's credential when it declares one.
    async fn invoke(&self, request: &CapabilityRequest, secret: Option<&str>)
        -> Result<ProviderOutput>;
}

/// Shared settings used to construct the built-in backends
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    /// Shared HTTP client
    pub client: reqwest::Client,

    /// Program used for the deploy-page capability
    pub deploy_command: Option<String>,

    /// Program used for the montage capability
    pub montage_command: Option<String>,
}

/// Build the backend implementing a provider kind
pub fn backend_for(kind: ProviderKind, settings: &BackendSettings) -> Arc<dyn Backend> {
    let client = settings.client.clone();
    match kind {
        ProviderKind::PexelsPhoto => Arc::new(PexelsPhotoBackend::new(client)),
        ProviderKind::GeminiImagen => Arc::new(ImagenBackend::new(client)),
        ProviderKind::Dalle3 => Arc::new(DalleBackend::new(client)),
        ProviderKind::GeminiFlash => Arc::new(GeminiTextBackend::flash(client)),
        ProviderKind::GeminiPro => Arc::new(GeminiTextBackend::pro(client)),
        ProviderKind::OpenAiMini => Arc::new(OpenAiTextBackend::new(client)),
        ProviderKind::EdgeTts => Arc::new(EdgeTtsBackend::new()),
        ProviderKind::ElevenLabs => Arc::new(ElevenLabsBackend::new(client)),
        ProviderKind::PexelsVideo => Arc::new(PexelsVideoBackend::new(client)),
        ProviderKind::KlingFal => Arc::new(KlingFalBackend::new(client)),
        ProviderKind::DeployCommand => Arc::new(CommandBackend::new(
            kind.name(),
            settings.deploy_command.clone(),
        )),
        ProviderKind::MontageCommand => Arc::new(CommandBackend::new(
            kind.name(),
            settings.montage_command.clone(),
        )),
    }
}

/// Unwrap the credential handed to a backend that needs one
pub(crate) fn require_secret<'a>(backend: &str, secret: Option<&'a str>) -> Result<&'a str> {
    secret
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{} invoked without a credential", backend))
}
