//! Maps free-text intent to a catalog pipeline by keyword scoring.
//!
//! The score of a pipeline is the number of its trigger keywords found in the
//! input (case-insensitive substring match). Pipelines that score zero are
//! never suggested, so an input with no keyword is reported as not detected
//! rather than guessed.

use serde::Serialize;
use tracing::debug;

use crate::domain::Capability;

use super::catalog::Catalog;
use super::pipeline::PipelineDefinition;

/// A score at or above this maps to full confidence
const FULL_CONFIDENCE_SCORE: f64 = 3.0;

/// How many runners-up are reported as alternatives
const MAX_ALTERNATIVES: usize = 2;

pub const NOT_DETECTED_SUGGESTION: &str =
    "Use atomic capabilities directly: image-gen, copywriter, tts, video-gen";

/// Result of intent detection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Detection {
    Detected {
        pipeline: String,
        confidence: f64,
        score: usize,
        matched_keywords: Vec<String>,
        description: String,
        steps: Vec<Capability>,
        estimated_cost: f64,
        estimated_time: String,
        alternatives: Vec<String>,
    },

    NotDetected {
        available: Vec<String>,
        suggestion: String,
    },
}

impl Detection {
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Detected { .. })
    }

    /// JSON report with an explicit `detected` flag
    pub fn report(&self) -> serde_json::Value {
        let mut report = serde_json::json!({"detected": self.is_detected()});
        if let (Some(target), Ok(serde_json::Value::Object(fields))) =
            (report.as_object_mut(), serde_json::to_value(self))
        {
            target.extend(fields);
        }
        report
    }

    pub fn pipeline(&self) -> Option<&str> {
        match self {
            Self::Detected { pipeline, .. } => Some(pipeline),
            Self::NotDetected { .. } => None,
        }
    }
}

struct Scored<'a> {
    pipeline: &'a PipelineDefinition,
    score: usize,
    matched: Vec<String>,
}

/// Keyword detector over a catalog
pub struct Detector<'a> {
    catalog: &'a Catalog,
}

impl<'a> Detector<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Pick the best-matching pipeline for a free-text request
    pub fn detect(&self, input: &str) -> Detection {
        let needle = input.to_lowercase();

        let mut matches: Vec<Scored<'_>> = self
            .catalog
            .iter()
            .filter_map(|pipeline| {
                let matched: Vec<String> = pipeline
                    .triggers
                    .iter()
                    .filter(|t| !t.is_empty() && needle.contains(&t.to_lowercase()))
                    .cloned()
                    .collect();
                (!matched.is_empty()).then(|| Scored {
                    pipeline,
                    score: matched.len(),
                    matched,
                })
            })
            .collect();

        // Stable sort keeps declaration order on ties
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        debug!(
            scores = ?matches.iter().map(|m| (m.pipeline.name.as_str(), m.score)).collect::<Vec<_>>(),
            "Scored pipelines"
        );

        let Some(best) = matches.first() else {
            return Detection::NotDetected {
                available: self.catalog.names(),
                suggestion: NOT_DETECTED_SUGGESTION.to_string(),
            };
        };

        let pipeline = best.pipeline;
        Detection::Detected {
            pipeline: pipeline.name.clone(),
            confidence: (best.score as f64 / FULL_CONFIDENCE_SCORE).min(1.0),
            score: best.score,
            matched_keywords: best.matched.clone(),
            description: pipeline.description.clone(),
            steps: pipeline.capabilities(),
            estimated_cost: pipeline.estimated_cost,
            estimated_time: pipeline.estimated_time.clone(),
            alternatives: matches
                .iter()
                .skip(1)
                .take(MAX_ALTERNATIVES)
                .map(|m| m.pipeline.name.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_content_pack() {
        let catalog = Catalog::builtin();
        let detection = Detector::new(&catalog).detect("Cria um POST pro Instagram do meu café");

        match detection {
            Detection::Detected {
                pipeline,
                score,
                matched_keywords,
                ..
            } => {
                assert_eq!(pipeline, "content-pack");
                assert_eq!(score, 2);
                assert_eq!(matched_keywords, ["post", "instagram"]);
            }
            other => panic!("expected detection, got {other:?}"),
        }
    }

    #[test]
    fn test_no_keywords_is_not_detected() {
        let catalog = Catalog::builtin();
        let detection = Detector::new(&catalog).detect("what time is it");

        assert!(!detection.is_detected());
        match detection {
            Detection::NotDetected { available, .. } => assert_eq!(available, catalog.names()),
            other => panic!("expected no detection, got {other:?}"),
        }
    }

    #[test]
    fn test_confidence_caps_at_one() {
        let catalog = Catalog::builtin();
        let detection =
            Detector::new(&catalog).detect("landing page site hotsite para captura de lead");
        match detection {
            Detection::Detected { confidence, .. } => assert_eq!(confidence, 1.0),
            other => panic!("expected detection, got {other:?}"),
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let catalog = Catalog::builtin();
        let detector = Detector::new(&catalog);
        let input = "stories e reels para o feed";
        assert_eq!(detector.detect(input), detector.detect(input));
    }

    #[test]
    fn test_serialized_shape() {
        let catalog = Catalog::builtin();
        let report = Detector::new(&catalog).detect("nothing").report();
        assert_eq!(report["detected"], false);
        assert!(report["available"].is_array());

        let report = Detector::new(&catalog).detect("um post").report();
        assert_eq!(report["detected"], true);
        assert_eq!(report["pipeline"], "content-pack");
    }
}
