use std::time::Duration;

use ai_agent::{ChatMessage, LanguageModelRequest, ModelError, ModelOptions};
use llm_router::{LlmRouter, ModelRoute, Provider};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn route(server: &MockServer, timeout_secs: u64) -> ModelRoute {
    ModelRoute {
        provider: Provider::OpenRouter,
        model: "test/model".into(),
        base_url: Some(format!("{}/api/v1", server.uri())),
        api_key: Some("sk-test".into()),
        request_timeout_secs: timeout_secs,
    }
}

fn request() -> LanguageModelRequest {
    LanguageModelRequest {
        messages: vec![
            ChatMessage::system("You are a browser agent."),
            ChatMessage::user("open example.com"),
        ],
        tools: Vec::new(),
        options: ModelOptions::default(),
    }
}

#[tokio::test]
async fn returns_first_choice_text_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test/model",
            "messages": [
                { "role": "system", "content": "You are a browser agent." },
                { "role": "user", "content": "open example.com" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"steps\":[\"Open example.com\"]}" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LlmRouter::new().unwrap().route(&route(&server, 5)).unwrap();
    let response = client.complete(&request()).await.unwrap();

    assert_eq!(response.text, r#"{"steps":["Open example.com"]}"#);
    assert_eq!(response.usage.total_tokens, Some(19));
}

#[tokio::test]
async fn too_many_requests_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exhausted"))
        .mount(&server)
        .await;

    let client = LlmRouter::new().unwrap().route(&route(&server, 5)).unwrap();
    let err = client.complete(&request()).await.unwrap_err();

    assert!(matches!(err, ModelError::RateLimited(ref msg) if msg.contains("quota exhausted")));
    assert!(err.is_transient());
}

#[tokio::test]
async fn slow_upstream_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({ "choices": [] })),
        )
        .mount(&server)
        .await;

    let client = LlmRouter::new().unwrap().route(&route(&server, 1)).unwrap();
    let err = client.complete(&request()).await.unwrap_err();

    assert!(matches!(err, ModelError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn server_errors_and_empty_choices_are_upstream_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = LlmRouter::new().unwrap().route(&route(&server, 5)).unwrap();

    let first = client.complete(&request()).await.unwrap_err();
    assert!(matches!(first, ModelError::Upstream(_)));
    let second = client.complete(&request()).await.unwrap_err();
    assert!(matches!(second, ModelError::Upstream(ref msg) if msg.contains("no message")));
}
