//! HTTP streaming against mocked provider endpoints.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unitgen_cli::*;

/// Drain a stream into its final text and terminal error, if any.
async fn collect(mut rx: UnboundedReceiver<StreamingResponse>) -> (String, Option<GenerationError>) {
    let mut text = String::new();
    while let Some(message) = rx.recv().await {
        match message {
            StreamingResponse::Fragments(fragments) => text = fragments.concat(),
            StreamingResponse::Complete => return (text, None),
            StreamingResponse::Error(e) => return (text, Some(e)),
        }
    }
    panic!("stream closed without a terminal message");
}

fn config_with_keys() -> Config {
    let mut config = Config::default();
    config.ai.openai_api_key = "sk-test".to_string();
    config.ai.gemini_api_key = "g-test".to_string();
    config
}

fn client_for(server: &MockServer, config: Config) -> HttpStreamClient {
    HttpStreamClient::new(Arc::new(config))
        .unwrap()
        .with_base_urls(&server.uri(), &server.uri())
}

#[tokio::test]
async fn openai_deltas_accumulate_until_done() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"describe(\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"'add')\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-test", "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, config_with_keys());
    let (text, error) = collect(client.stream("openai", "gpt-test", "Write tests")).await;

    assert_eq!(error, None);
    assert_eq!(text, "describe('add')");
}

#[tokio::test]
async fn gemini_parts_are_streamed_with_key_in_query() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"def test_\"}]}}]}\r\n\r\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"add(): ...\"}]}}]}\r\n\r\n",
    );
    Mock::given(method("POST"))
        .and(path("/models/gemini-x:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(query_param("key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, config_with_keys());
    let (text, error) = collect(client.stream("Gemini", "gemini-x", "Write tests")).await;

    assert_eq!(error, None);
    assert_eq!(text, "def test_add(): ...");
}

#[tokio::test]
async fn http_error_surfaces_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "error": { "message": "overloaded" } })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, config_with_keys());
    let (text, error) = collect(client.stream("openai", "gpt-test", "p")).await;

    assert_eq!(text, "");
    assert_eq!(
        error,
        Some(GenerationError::provider("openai", "HTTP 500: overloaded"))
    );
}

#[tokio::test]
async fn error_event_mid_stream_fails_after_partial_text() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"quota exceeded\"}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = client_for(&server, config_with_keys());
    let (_, error) = collect(client.stream("openai", "gpt-test", "p")).await;

    let error = error.expect("stream should fail");
    assert_eq!(error.failure_kind(), FailureKind::Provider);
    assert!(error.to_string().contains("quota exceeded"));
}

struct NoKeys;

impl ConfigProvider for NoKeys {
    fn api_key(&self, _provider: &str) -> Option<String> {
        None
    }

    fn ignore_list(&self) -> IgnoreList {
        IgnoreList::default()
    }

    fn naming_convention(&self) -> NamingConvention {
        NamingConvention::default()
    }
}

#[tokio::test]
async fn missing_key_is_a_single_configuration_error() {
    let server = MockServer::start().await;
    let client = HttpStreamClient::new(Arc::new(NoKeys))
        .unwrap()
        .with_base_urls(&server.uri(), &server.uri());

    let mut rx = client.stream("gemini", "gemini-x", "p");
    assert_eq!(
        rx.recv().await,
        Some(StreamingResponse::Error(GenerationError::Configuration(
            "gemini API key is not configured".to_string()
        )))
    );
    assert_eq!(rx.recv().await, None);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let server = MockServer::start().await;
    let client = client_for(&server, config_with_keys());

    let (_, error) = collect(client.stream("claude", "m", "p")).await;
    assert_eq!(
        error,
        Some(GenerationError::Configuration(
            "unsupported provider: claude".to_string()
        ))
    );
}
