//! HTTP backend tests against wiremock servers

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use capflow::adapters::http::build_client;
use capflow::adapters::{Backend, GeminiTextBackend, ImagenBackend, OpenAiTextBackend, PexelsPhotoBackend};
use capflow::config::Credentials;
use capflow::core::{ProviderChain, ProviderSpec, SpendLedger};
use capflow::domain::{Capability, CapabilityRequest, ProviderKind};

fn client() -> reqwest::Client {
    build_client(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_pexels_downloads_first_photo() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(header("Authorization", "pexels-key"))
        .and(query_param("query", "cozy cafe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "photos": [{"id": 42, "src": {"large2x": format!("{}/photos/42.jpg", server.uri())}}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/42.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let backend = PexelsPhotoBackend::new(client()).with_base_url(server.uri());
    let request = CapabilityRequest::new(Capability::Image, "cozy cafe")
        .with_output_path(temp.path().join("hero"));

    let output = backend.invoke(&request, Some("pexels-key")).await.unwrap();

    let location = output.location.unwrap();
    assert!(location.ends_with("hero.jpg"));
    assert_eq!(std::fs::read(&location).unwrap(), b"jpeg-bytes");
    assert!(output.note.unwrap().contains("not AI generated"));
    assert_eq!(output.raw["photo_id"], 42);
}

#[tokio::test]
async fn test_pexels_without_results_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"photos": []})))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let backend = PexelsPhotoBackend::new(client()).with_base_url(server.uri());
    let request = CapabilityRequest::new(Capability::Image, "zzzz")
        .with_output_path(temp.path().join("hero"));

    let err = backend.invoke(&request, Some("k")).await.unwrap_err();
    assert!(err.to_string().contains("no results"));
}

#[tokio::test]
async fn test_gemini_text_reports_token_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .and(query_param("key", "gemini-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "  Wake up to fresh beans.  "}]}}],
            "usageMetadata": {"promptTokenCount": 1000, "candidatesTokenCount": 500}
        })))
        .mount(&server)
        .await;

    let backend = GeminiTextBackend::flash(client()).with_base_url(server.uri());
    let request = CapabilityRequest::new(Capability::Text, "artisan coffee")
        .with_config("copy_type", "headline");

    let output = backend.invoke(&request, Some("gemini-key")).await.unwrap();

    assert_eq!(output.artifact.as_deref(), Some("Wake up to fresh beans."));
    assert!(output.location.is_none());
    let cost = output.cost.unwrap();
    assert!((cost - 0.0003).abs() < 1e-12);
    assert_eq!(output.raw["input_tokens"], 1000);
}

#[tokio::test]
async fn test_openai_error_status_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer openai-key"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let backend = OpenAiTextBackend::new(client()).with_base_url(server.uri());
    let request = CapabilityRequest::new(Capability::Text, "artisan coffee");

    let err = backend.invoke(&request, Some("openai-key")).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("OpenAI error"));
    assert!(message.contains("429"));
    assert!(message.contains("rate limited"));
}

#[tokio::test]
async fn test_missing_secret_fails_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let backend = OpenAiTextBackend::new(client()).with_base_url(server.uri());
    let request = CapabilityRequest::new(Capability::Text, "artisan coffee");
    assert!(backend.invoke(&request, None).await.is_err());
}

#[tokio::test]
async fn test_chain_falls_back_from_stock_to_imagen() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;
    let png = base64::engine::general_purpose::STANDARD.encode(b"png-bytes");
    Mock::given(method("POST"))
        .and(path("/v1beta/models/imagen-4.0-generate-001:predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predictions": [{"bytesBase64Encoded": png}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let ledger = SpendLedger::open(temp.path().join("cost_log.jsonl")).await.unwrap();
    let credentials = Credentials::default()
        .with("PEXELS_API_KEY", "pexels-key")
        .with("GOOGLE_API_KEY_GEMINI", "gemini-key");

    let chain = ProviderChain::new(
        Capability::Image,
        vec![
            ProviderSpec::for_kind(
                ProviderKind::PexelsPhoto,
                Arc::new(PexelsPhotoBackend::new(client()).with_base_url(server.uri())),
            ),
            ProviderSpec::for_kind(
                ProviderKind::GeminiImagen,
                Arc::new(ImagenBackend::new(client()).with_base_url(server.uri())),
            ),
        ],
    )
    .unwrap();

    let request = CapabilityRequest::new(Capability::Image, "cozy cafe")
        .with_output_path(temp.path().join("out").join("hero"));
    let success = chain.invoke(&request, &ledger, &credentials).await.unwrap();

    assert_eq!(success.provider, "gemini_imagen");
    assert_eq!(success.cost, 0.04);
    assert!(success.failures[0].reason.contains("500"));

    let location = success.output.location.unwrap();
    assert_eq!(std::fs::read(location).unwrap(), b"png-bytes");

    let entries = ledger.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, "gemini_imagen");
    assert_eq!(entries[0].cost, 0.04);
}
