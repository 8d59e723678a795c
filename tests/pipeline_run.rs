//! Pipeline execution integration tests
//!
//! Runs small pipelines against scripted chains and checks halting,
//! projection, manifest reuse and dry-run behaviour.

mod common;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use capflow::config::{Credentials, ResolvedConfig};
use capflow::core::{
    Catalog, ChainSet, Engine, Executor, InputRef, PipelineDefinition, ProviderChain, RunOptions,
    StepDefinition, MANIFEST_FILE,
};
use capflow::domain::{Capability, RunStatus};
use capflow::error::EngineError;

use common::{calls, scripted, temp_ledger, Script};

fn three_steps() -> PipelineDefinition {
    PipelineDefinition::new("promo", "copy, image, voiceover")
        .step(StepDefinition::new(Capability::Text, InputRef::context("product"), "copy"))
        .step(StepDefinition::new(Capability::Image, InputRef::generated("copy"), "image"))
        .step(StepDefinition::new(Capability::Speech, InputRef::generated("copy"), "voiceover"))
        .final_output(&["voiceover", "image", "copy"])
}

fn context(product: &str) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("product".to_string(), json!(product));
    context
}

#[tokio::test]
async fn test_failing_middle_step_halts_the_run() {
    let (ledger, temp) = temp_ledger().await;
    let (text, _) = scripted("writer", "gemini_flash_text", Script::Text("Fresh beans daily", 0.002));
    let (image, image_calls) = scripted("painter", "gemini_imagen", Script::Fail("quota exceeded"));
    let (speech, speech_calls) = scripted("voice", "edge_tts", Script::Echo);

    let chains = ChainSet::new()
        .with(ProviderChain::new(Capability::Text, vec![text]).unwrap())
        .with(ProviderChain::new(Capability::Image, vec![image]).unwrap())
        .with(ProviderChain::new(Capability::Speech, vec![speech]).unwrap());
    let credentials = Credentials::default();

    let run = Executor::new(&chains, &ledger, &credentials)
        .run(&three_steps(), context("coffee"), temp.path().join("run"))
        .await
        .unwrap();

    assert!(run.is_failed());
    match &run.status {
        RunStatus::Failed { step, capability, error } => {
            assert_eq!(*step, 1);
            assert_eq!(*capability, Capability::Image);
            assert!(error.contains("quota exceeded"));
        }
        other => panic!("unexpected status: {other:?}"),
    }

    assert_eq!(run.generated.len(), 1);
    assert_eq!(run.generated["copy"], json!("Fresh beans daily"));
    assert_eq!(run.step_results.len(), 2);
    assert!(run.step_results[0].success);
    assert!(!run.step_results[1].success);
    assert!(run.final_output.is_empty());

    assert_eq!(calls(&image_calls), 1);
    assert_eq!(calls(&speech_calls), 0);
    assert!((run.session_cost - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn test_completed_run_projects_final_output() {
    let (ledger, temp) = temp_ledger().await;
    let (text, _) = scripted("writer", "gemini_flash_text", Script::Text("Fresh beans daily", 0.001));
    let (image, _) = scripted("painter", "pexels", Script::Echo);
    let (speech, _) = scripted("voice", "edge_tts", Script::Echo);

    let chains = ChainSet::new()
        .with(ProviderChain::new(Capability::Text, vec![text]).unwrap())
        .with(ProviderChain::new(Capability::Image, vec![image]).unwrap())
        .with(ProviderChain::new(Capability::Speech, vec![speech]).unwrap());
    let credentials = Credentials::default();

    let run = Executor::new(&chains, &ledger, &credentials)
        .run(&three_steps(), context("coffee"), temp.path().join("run"))
        .await
        .unwrap();

    assert!(run.is_completed());
    assert_eq!(run.step_results.len(), 3);
    let keys: Vec<&String> = run.final_output.keys().collect();
    assert_eq!(keys, ["voiceover", "image", "copy"]);
    assert_eq!(run.final_output["image"], json!("painter: Fresh beans daily"));
    assert_eq!(run.session_cost, ledger.session_cost().await.unwrap());
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn test_rerun_into_same_directory_skips_completed_steps() {
    let (ledger, temp) = temp_ledger().await;
    let output_dir = temp.path().join("run");
    let credentials = Credentials::default();

    let (text, text_calls) = scripted("writer", "gemini_flash_text", Script::Text("Fresh beans daily", 0.002));
    let (image, _) = scripted("painter", "gemini_imagen", Script::Fail("quota exceeded"));
    let (speech, _) = scripted("voice", "edge_tts", Script::Echo);
    let failing = ChainSet::new()
        .with(ProviderChain::new(Capability::Text, vec![text.clone()]).unwrap())
        .with(ProviderChain::new(Capability::Image, vec![image]).unwrap())
        .with(ProviderChain::new(Capability::Speech, vec![speech.clone()]).unwrap());

    let first = Executor::new(&failing, &ledger, &credentials)
        .run(&three_steps(), context("coffee"), output_dir.clone())
        .await
        .unwrap();
    assert!(first.is_failed());
    assert!(output_dir.join(MANIFEST_FILE).exists());

    let (fixed, fixed_calls) = scripted("painter", "pexels", Script::Echo);
    let repaired = ChainSet::new()
        .with(ProviderChain::new(Capability::Text, vec![text]).unwrap())
        .with(ProviderChain::new(Capability::Image, vec![fixed]).unwrap())
        .with(ProviderChain::new(Capability::Speech, vec![speech]).unwrap());

    let second = Executor::new(&repaired, &ledger, &credentials)
        .run(&three_steps(), context("coffee"), output_dir)
        .await
        .unwrap();

    assert!(second.is_completed());
    assert!(second.step_results[0].skipped);
    assert!(!second.step_results[1].skipped);
    assert_eq!(second.generated["copy"], json!("Fresh beans daily"));
    assert_eq!(calls(&text_calls), 1);
    assert_eq!(calls(&fixed_calls), 1);
    // The reused step was not charged twice
    assert_eq!(ledger.entries().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_changed_input_is_not_reused() {
    let (ledger, temp) = temp_ledger().await;
    let output_dir = temp.path().join("run");
    let credentials = Credentials::default();

    let (text, text_calls) = scripted("writer", "gemini_flash_text", Script::Echo);
    let (image, _) = scripted("painter", "pexels", Script::Echo);
    let (speech, _) = scripted("voice", "edge_tts", Script::Echo);
    let chains = ChainSet::new()
        .with(ProviderChain::new(Capability::Text, vec![text]).unwrap())
        .with(ProviderChain::new(Capability::Image, vec![image]).unwrap())
        .with(ProviderChain::new(Capability::Speech, vec![speech]).unwrap());
    let executor = Executor::new(&chains, &ledger, &credentials);

    executor
        .run(&three_steps(), context("coffee"), output_dir.clone())
        .await
        .unwrap();
    let second = executor
        .run(&three_steps(), context("tea"), output_dir)
        .await
        .unwrap();

    assert!(second.step_results.iter().all(|r| !r.skipped));
    assert_eq!(calls(&text_calls), 2);
}

#[tokio::test]
async fn test_missing_context_fails_before_any_step() {
    let (ledger, temp) = temp_ledger().await;
    let (text, text_calls) = scripted("writer", "gemini_flash_text", Script::Echo);
    let chains = ChainSet::new().with(ProviderChain::new(Capability::Text, vec![text]).unwrap());
    let credentials = Credentials::default();

    let err = Executor::new(&chains, &ledger, &credentials)
        .run(&three_steps(), Map::new(), temp.path().join("run"))
        .await
        .unwrap_err();

    match err {
        EngineError::MissingContext { pipeline, path } => {
            assert_eq!(pipeline, "promo");
            assert_eq!(path, "product");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls(&text_calls), 0);
    assert!(!temp.path().join("run").exists());
}

#[tokio::test]
async fn test_forward_reference_rejected_before_execution() {
    let (ledger, temp) = temp_ledger().await;
    let (text, text_calls) = scripted("writer", "gemini_flash_text", Script::Echo);
    let chains = ChainSet::new().with(ProviderChain::new(Capability::Text, vec![text]).unwrap());
    let credentials = Credentials::default();

    let mut pipeline = three_steps();
    pipeline.steps.swap(0, 1);

    let err = Executor::new(&chains, &ledger, &credentials)
        .run(&pipeline, context("coffee"), temp.path().join("run"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidPipeline { .. }));
    assert!(err.to_string().contains("before it is produced"));
    assert_eq!(calls(&text_calls), 0);
}

#[tokio::test]
async fn test_pipeline_dry_run_touches_nothing() {
    let temp = TempDir::new().unwrap();
    let config = ResolvedConfig::with_home(temp.path().join("home"));
    let (ledger, _ledger_dir) = temp_ledger().await;
    let (text, text_calls) = scripted("writer", "gemini_flash_text", Script::Echo);
    let chains = ChainSet::new().with(ProviderChain::new(Capability::Text, vec![text]).unwrap());
    let engine = Engine::new(config, Catalog::builtin(), chains, ledger);

    let plan = engine
        .plan_pipeline("content-pack", &RunOptions::default())
        .unwrap();

    assert_eq!(plan.pipeline, "content-pack");
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[0].input, "context.product");
    assert_eq!(plan.steps[0].output_key, "image_path");
    assert_eq!(plan.context_required, ["product"]);
    assert_eq!(plan.estimated_cost, 0.06);
    assert!(plan.output_dir.starts_with(temp.path().join("home").join("output")));

    assert!(!plan.output_dir.exists());
    assert_eq!(calls(&text_calls), 0);
    assert!(engine.ledger().entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_pipeline_lists_catalog() {
    let temp = TempDir::new().unwrap();
    let config = ResolvedConfig::with_home(temp.path());
    let (ledger, _ledger_dir) = temp_ledger().await;
    let engine = Engine::new(config, Catalog::builtin(), ChainSet::new(), ledger);

    let err = engine
        .run_pipeline("podcast", Map::new(), RunOptions::default())
        .await
        .unwrap_err();
    match err {
        EngineError::UnknownPipeline { available, .. } => assert_eq!(available.len(), 4),
        other => panic!("unexpected error: {other}"),
    }
}

fn copy_only() -> PipelineDefinition {
    PipelineDefinition::new("copy", "one line of copy")
        .step(StepDefinition::new(Capability::Text, InputRef::context("product"), "copy"))
        .final_output(&["copy"])
}

fn writer_chains() -> ChainSet {
    let (text, _) = scripted("writer", "gemini_flash_text", Script::Text("Fresh beans daily", 0.002));
    ChainSet::new().with(ProviderChain::new(Capability::Text, vec![text]).unwrap())
}

#[tokio::test]
async fn test_hand_edited_ledger_does_not_lose_the_run() {
    let (ledger, temp) = temp_ledger().await;
    std::fs::write(ledger.log_path(), "not json\n").unwrap();
    let chains = writer_chains();
    let credentials = Credentials::default();

    let run = Executor::new(&chains, &ledger, &credentials)
        .run(&copy_only(), context("coffee"), temp.path().join("run"))
        .await
        .unwrap();

    assert!(run.is_completed());
    assert_eq!(run.final_output["copy"], json!("Fresh beans daily"));
    assert!((run.session_cost - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn test_unreadable_ledger_reports_this_runs_charges() {
    let (ledger, temp) = temp_ledger().await;
    std::fs::write(ledger.log_path(), [0xff, 0xfe, b'\n']).unwrap();
    let chains = writer_chains();
    let credentials = Credentials::default();

    let run = Executor::new(&chains, &ledger, &credentials)
        .run(&copy_only(), context("coffee"), temp.path().join("run"))
        .await
        .unwrap();

    assert!(ledger.session_cost().await.is_err());
    assert!(run.is_completed());
    assert_eq!(run.generated["copy"], json!("Fresh beans daily"));
    assert!((run.session_cost - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn test_manifest_write_failure_keeps_the_paid_output() {
    let (ledger, temp) = temp_ledger().await;
    let output_dir = temp.path().join("run");
    std::fs::write(&output_dir, "a file, not a directory").unwrap();
    let chains = writer_chains();
    let credentials = Credentials::default();

    let run = Executor::new(&chains, &ledger, &credentials)
        .run(&copy_only(), context("coffee"), output_dir)
        .await
        .unwrap();

    match &run.status {
        RunStatus::Failed { step, capability, error } => {
            assert_eq!(*step, 0);
            assert_eq!(*capability, Capability::Text);
            assert!(error.starts_with("Storage error"));
        }
        other => panic!("unexpected status: {other:?}"),
    }

    let failed = &run.step_results[0];
    assert!(!failed.success);
    assert_eq!(failed.provider.as_deref(), Some("writer"));
    assert_eq!(failed.cost, Some(0.002));
    assert_eq!(failed.result["artifact"], json!("Fresh beans daily"));
    assert!(run.generated.is_empty());

    assert!((ledger.total().await.unwrap() - 0.002).abs() < 1e-9);
    assert!((run.session_cost - 0.002).abs() < 1e-9);
}
