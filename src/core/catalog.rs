//! Registry of named pipelines.
//!
//! The catalog is built once at startup (built-in pipelines plus any loaded
//! from YAML) and is read-only afterwards. Declaration order is significant:
//! the detector breaks score ties by it.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::domain::Capability;
use crate::error::EngineError;

use super::pipeline::{InputRef, PipelineDefinition, StepDefinition};

/// Ordered, name-unique set of validated pipelines
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pipelines: Vec<PipelineDefinition>,
}

impl Catalog {
    /// Build a catalog; every pipeline is validated and names must be unique
    pub fn new(pipelines: Vec<PipelineDefinition>) -> Result<Self, EngineError> {
        let mut catalog = Self::default();
        for pipeline in pipelines {
            catalog.add(pipeline)?;
        }
        Ok(catalog)
    }

    /// The built-in pipelines
    pub fn builtin() -> Self {
        Self {
            pipelines: builtin_pipelines(),
        }
    }

    fn add(&mut self, pipeline: PipelineDefinition) -> Result<(), EngineError> {
        pipeline.validate()?;
        if self.pipelines.iter().any(|p| p.name == pipeline.name) {
            return Err(EngineError::InvalidPipeline {
                pipeline: pipeline.name.clone(),
                reason: "a pipeline with this name already exists".to_string(),
            });
        }
        self.pipelines.push(pipeline);
        Ok(())
    }

    /// Append pipelines loaded from a YAML file
    pub fn load_file(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipelines file: {}", path.display()))?;
        let pipelines = PipelineDefinition::many_from_yaml(&content)
            .with_context(|| format!("Invalid pipelines file: {}", path.display()))?;

        for pipeline in pipelines {
            debug!(pipeline = %pipeline.name, "Loaded pipeline");
            self.add(pipeline)?;
        }
        Ok(self)
    }

    /// Look up a pipeline by name
    pub fn get(&self, name: &str) -> Result<&PipelineDefinition, EngineError> {
        self.pipelines
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| EngineError::UnknownPipeline {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Pipeline names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.pipelines.iter().map(|p| p.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.iter()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

fn builtin_pipelines() -> Vec<PipelineDefinition> {
    use Capability::*;

    let context = InputRef::context;
    let generated = InputRef::generated;

    vec![
        PipelineDefinition::new("content-pack", "Image + copy + hashtags for social media")
            .triggers(&[
                "post", "conteúdo", "social", "instagram", "feed", "publicação", "content",
                "mídia social",
            ])
            .step(
                StepDefinition::new(Image, context("product"), "image_path")
                    .with_config("style", InputRef::literal("lifestyle")),
            )
            .step(
                StepDefinition::new(Text, context("product"), "copy")
                    .with_config("copy_type", InputRef::literal("social_post"))
                    .with_config("platform", context("platform")),
            )
            .final_output(&["image_path", "copy"])
            .estimates(0.06, "30-60 seconds"),
        PipelineDefinition::new("landing-page", "Copy + image + deploy (delivers a live URL)")
            .triggers(&[
                "landing", "página", "site", "lp", "captura", "lead", "página de vendas",
                "hotsite",
            ])
            .step(
                StepDefinition::new(Text, context("product"), "headline")
                    .with_config("copy_type", InputRef::literal("headline")),
            )
            .step(
                StepDefinition::new(Text, context("product"), "description")
                    .with_config("copy_type", InputRef::literal("description")),
            )
            .step(
                StepDefinition::new(Text, context("product"), "cta")
                    .with_config("copy_type", InputRef::literal("cta")),
            )
            .step(
                StepDefinition::new(Image, context("product"), "hero_image")
                    .with_config("style", InputRef::literal("hero")),
            )
            .step(
                StepDefinition::new(
                    Deploy,
                    InputRef::All(vec![
                        generated("headline"),
                        generated("description"),
                        generated("cta"),
                        generated("hero_image"),
                    ]),
                    "url",
                )
                .with_config("template", InputRef::literal("landing")),
            )
            .final_output(&["url", "headline", "description", "hero_image"])
            .estimates(0.10, "2-3 minutes"),
        PipelineDefinition::new("ugc-video", "Character + scenes + video + voiceover + montage")
            .triggers(&[
                "vídeo ugc", "vídeo", "ugc", "testemunho", "depoimento", "reels", "tiktok",
                "video ad",
            ])
            .step(
                StepDefinition::new(Image, context("character_description"), "character_portrait")
                    .with_config("style", InputRef::literal("portrait")),
            )
            .step(
                StepDefinition::new(Image, context("scene_descriptions"), "scene_images")
                    .with_config("style", InputRef::literal("lifestyle"))
                    .with_config("multiple", InputRef::literal(true)),
            )
            .step(
                StepDefinition::new(Video, generated("scene_images"), "video_clips")
                    .with_config("style", InputRef::literal("ugc_talking")),
            )
            .step(
                StepDefinition::new(Speech, context("script"), "voiceover")
                    .with_config("voice_style", InputRef::literal("conversational")),
            )
            .step(StepDefinition::new(
                Montage,
                InputRef::All(vec![generated("video_clips"), generated("voiceover")]),
                "final_video",
            ))
            .final_output(&["final_video", "character_portrait"])
            .estimates(5.00, "5-10 minutes"),
        PipelineDefinition::new("stories-pack", "Sequence of 3-5 stories with text + image")
            .triggers(&[
                "stories", "story", "carrossel", "sequência", "carousel", "série de posts",
            ])
            .step(
                StepDefinition::new(Text, context("topic"), "story_texts")
                    .with_config("copy_type", InputRef::literal("social_post"))
                    .with_config("count", InputRef::literal(5)),
            )
            .step(
                StepDefinition::new(Image, generated("story_texts"), "story_images")
                    .with_config("style", InputRef::literal("minimal"))
                    .with_config("aspect_ratio", InputRef::literal("9:16")),
            )
            .final_output(&["story_images", "story_texts"])
            .estimates(0.20, "2-3 minutes"),
    ]
}
