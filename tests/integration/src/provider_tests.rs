//! Adapter tests against a wiremock upstream.

use futures::StreamExt;
use orchestrator_core::{GatewayError, GenerationRequest, ModelProvider, TaskType};
use orchestrator_providers::{OpenAiConfig, OpenAiProvider};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> GenerationRequest {
    GenerationRequest::builder()
        .tenant("family-1")
        .user("user-1")
        .task_type(TaskType::Chat)
        .prompt("Where should we eat in Lisbon?")
        .build()
        .expect("valid request")
}

fn provider_for(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new(
        OpenAiConfig::new("openai-test", SecretString::new("sk-test".to_string()))
            .with_base_url(server.uri()),
    )
    .expect("provider builds")
}

#[tokio::test]
async fn successful_call_reports_usage_and_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Time Out Market."}}],
            "usage": {"prompt_tokens": 18, "completion_tokens": 6, "total_tokens": 24}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let response = provider.generate(&request()).await.expect("call succeeds");

    assert_eq!(response.text, "Time Out Market.");
    assert_eq!(response.units.total(), 24);
    assert!(!response.cost_estimated);
    assert!(response.cost_usd > 0.0);
}

#[tokio::test]
async fn unauthorized_maps_to_invalid_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider.generate(&request()).await.expect_err("401 fails");
    assert!(matches!(error, GatewayError::InvalidCredentials { .. }));
}

#[tokio::test]
async fn rate_limit_maps_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .append_header("Retry-After", "30")
                .set_body_json(json!({
                    "error": {"message": "Rate limit exceeded", "code": "rate_limit_exceeded"}
                })),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider.generate(&request()).await.expect_err("429 fails");
    match error {
        GatewayError::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Some(std::time::Duration::from_secs(30)));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_maps_to_retryable_internal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let error = provider.generate(&request()).await.expect_err("500 fails");
    match &error {
        GatewayError::ProviderInternal { status_code, .. } => {
            assert_eq!(*status_code, Some(500));
        }
        other => panic!("expected ProviderInternal, got {other:?}"),
    }
    assert!(error.is_retryable());
}

#[tokio::test]
async fn streaming_parses_sse_chunks() {
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Time \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Out Market.\"}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":18,\"completion_tokens\":6}}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let stream = provider
        .stream_generate(&request())
        .await
        .expect("stream establishes");

    let chunks: Vec<_> = stream.collect().await;
    let text: String = chunks
        .iter()
        .filter_map(|item| item.as_ref().ok())
        .map(|chunk| chunk.delta.clone())
        .collect();
    assert_eq!(text, "Time Out Market.");

    let last = chunks
        .last()
        .expect("stream not empty")
        .as_ref()
        .expect("final chunk ok");
    assert!(last.done);
    assert_eq!(last.usage.map(|u| u.total()), Some(24));
}
