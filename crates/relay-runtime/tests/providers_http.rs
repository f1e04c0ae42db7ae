//! Wire-format tests for the HTTP providers against mock servers.

use std::time::Duration;

use futures::StreamExt;
use relay_runtime::providers::{
    AnthropicProvider, BedrockProvider, OllamaProvider, OpenAiProvider, VllmProvider,
};
use relay_runtime::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{
    body_partial_json, header, header_exists, method, path, path_regex, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user(prompt: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(prompt)]
}

fn config(model: &str) -> CompletionConfig {
    CompletionConfig::new(model)
        .with_max_tokens(50)
        .with_timeout(Duration::from_secs(5))
}

async fn mount_json(server: &MockServer, route: &str, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

// ============================================================================
// Anthropic
// ============================================================================

#[tokio::test]
async fn anthropic_sends_headers_and_joins_text_blocks() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 50,
            "system": "Be brief.",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "Hello"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                {"type": "text", "text": "Hi "},
                {"type": "text", "text": "there"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("test-key").with_base_url(server.uri());
    let response = provider
        .complete(
            vec![ChatMessage::system("Be brief."), ChatMessage::user("Hello")],
            &config("claude-3-5-sonnet-20241022"),
        )
        .await
        .unwrap();

    assert_eq!(response.content, "Hi there");
    assert_eq!(response.usage.prompt_tokens, 12);
    assert_eq!(response.usage.completion_tokens, 3);
    assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn anthropic_null_text_is_empty() {
    let server = MockServer::start().await;
    mount_json(
        &server,
        "/messages",
        200,
        json!({"content": [{"type": "text", "text": null}]}),
    )
    .await;

    let provider = AnthropicProvider::new("k").with_base_url(server.uri());
    let response = provider.complete(user("Hi"), &config("claude")).await.unwrap();
    assert_eq!(response.content, "");
}

#[tokio::test]
async fn anthropic_missing_content_is_malformed() {
    let server = MockServer::start().await;
    mount_json(&server, "/messages", 200, json!({"id": "msg_01", "type": "message"})).await;

    let provider = AnthropicProvider::new("k").with_base_url(server.uri());
    let err = provider.complete(user("Hi"), &config("claude")).await.unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)));
}

#[tokio::test]
async fn anthropic_overloaded_is_transient() {
    let server = MockServer::start().await;
    mount_json(
        &server,
        "/messages",
        529,
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
    )
    .await;

    let provider = AnthropicProvider::new("k").with_base_url(server.uri());
    let err = provider.complete(user("Hi"), &config("claude")).await.unwrap_err();

    match &err {
        ProviderError::ApiError { status, message } => {
            assert_eq!(*status, 529);
            assert_eq!(message, "Overloaded");
        }
        other => panic!("expected ApiError, got {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn anthropic_stream_yields_text_deltas() {
    let server = MockServer::start().await;

    let sse = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_01\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("k").with_base_url(server.uri());
    let chunks: Vec<String> = provider
        .stream(user("Hi"), &config("claude"))
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert_eq!(chunks, vec!["Hel".to_string(), "lo".to_string()]);
}

#[tokio::test]
async fn anthropic_stream_error_event_surfaces() {
    let server = MockServer::start().await;

    let sse = concat!(
        "event: error\n",
        "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("k").with_base_url(server.uri());
    let items: Vec<_> = provider
        .stream(user("Hi"), &config("claude"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    assert!(matches!(&items[0], Err(ProviderError::Stream(msg)) if msg.contains("Overloaded")));
}

fn text_delta_event(text: &str) -> String {
    format!(
        "event: content_block_delta\ndata: {{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{}\"}}}}\n\n",
        text
    )
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

/// Serve a single event-stream response, pausing before each event.
async fn paced_sse_server(events: Vec<(Duration, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for (pause, event) in events {
            tokio::time::sleep(pause).await;
            if socket.write_all(event.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = socket.shutdown().await;
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn anthropic_stream_outlives_request_timeout() {
    let pause = Duration::from_millis(200);
    let mut events: Vec<(Duration, String)> =
        (0..4).map(|i| (pause, text_delta_event(&format!("c{}", i)))).collect();
    events.push((pause, "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".into()));
    let base_url = paced_sse_server(events).await;

    let provider = AnthropicProvider::new("k").with_base_url(base_url);
    let items: Vec<_> = provider
        .stream(user("Hi"), &config("claude").with_timeout(Duration::from_millis(300)))
        .await
        .unwrap()
        .collect()
        .await;

    let chunks: Vec<String> = items.into_iter().map(|item| item.unwrap()).collect();
    assert_eq!(chunks, vec!["c0", "c1", "c2", "c3"]);
}

#[tokio::test]
async fn anthropic_stalled_stream_ends_with_timeout() {
    let base_url = paced_sse_server(vec![
        (Duration::ZERO, text_delta_event("first")),
        (Duration::from_secs(3), text_delta_event("never")),
    ])
    .await;

    let idle = Duration::from_millis(200);
    let provider = AnthropicProvider::new("k").with_base_url(base_url);
    let items: Vec<_> = provider
        .stream(user("Hi"), &config("claude").with_timeout(idle))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "first");
    assert!(matches!(items[1], Err(ProviderError::Timeout(d)) if d == idle));
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

#[tokio::test]
async fn openai_bearer_auth_and_first_choice() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "max_tokens": 50,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello! How can I help?"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 6, "total_tokens": 15}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("sk-test").with_base_url(server.uri());
    let response = provider.complete(user("Hello"), &config("gpt-4o-mini")).await.unwrap();

    assert_eq!(response.content, "Hello! How can I help?");
    assert_eq!(response.model, "gpt-4o-mini");
    assert_eq!(response.usage.total(), 15);
}

#[tokio::test]
async fn openai_null_content_is_empty() {
    let server = MockServer::start().await;
    mount_json(
        &server,
        "/chat/completions",
        200,
        json!({"choices": [{"message": {"role": "assistant", "content": null}}]}),
    )
    .await;

    let provider = OpenAiProvider::new("k").with_base_url(server.uri());
    let response = provider.complete(user("Hi"), &config("gpt-4o")).await.unwrap();
    assert_eq!(response.content, "");
}

#[tokio::test]
async fn openai_missing_or_empty_choices_is_malformed() {
    for body in [json!({"id": "chatcmpl-1"}), json!({"choices": []})] {
        let server = MockServer::start().await;
        mount_json(&server, "/chat/completions", 200, body).await;

        let provider = OpenAiProvider::new("k").with_base_url(server.uri());
        let err = provider.complete(user("Hi"), &config("gpt-4o")).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)), "{:?}", err);
    }
}

#[tokio::test]
async fn openai_status_classification() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rate-limited/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .mount(&server)
        .await;
    mount_json(
        &server,
        "/unauthorized/chat/completions",
        401,
        json!({"error": {"message": "Incorrect API key provided"}}),
    )
    .await;
    mount_json(
        &server,
        "/bad-request/chat/completions",
        400,
        json!({"error": {"message": "max_tokens is too large"}}),
    )
    .await;

    let call = |prefix: &str| {
        let provider =
            OpenAiProvider::new("k").with_base_url(format!("{}/{}", server.uri(), prefix));
        async move { provider.complete(user("Hi"), &config("gpt-4o")).await.unwrap_err() }
    };

    let err = call("rate-limited").await;
    assert!(matches!(
        err,
        ProviderError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
    ));
    assert!(err.is_transient());

    let err = call("unauthorized").await;
    assert!(matches!(err, ProviderError::AuthError));
    assert!(!err.is_transient());

    let err = call("bad-request").await;
    assert!(matches!(
        &err,
        ProviderError::ApiError { status: 400, message } if message == "max_tokens is too large"
    ));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn openai_non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k").with_base_url(server.uri());
    let err = provider.complete(user("Hi"), &config("gpt-4o")).await.unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)));
}

#[tokio::test]
async fn azure_routes_by_deployment_with_api_key_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/support-gpt4/chat/completions"))
        .and(query_param("api-version", "2024-02-15-preview"))
        .and(header("api-key", "azure-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "From Azure"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::azure(server.uri(), "support-gpt4", "azure-key");
    let response = provider.complete(user("Hi"), &config("gpt-4")).await.unwrap();
    assert_eq!(response.content, "From Azure");
    assert_eq!(provider.name(), "azure-openai");
}

#[tokio::test]
async fn together_uses_bearer_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer together-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "From Together"}}]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::together("together-key").with_base_url(server.uri());
    let response = provider
        .complete(user("Hi"), &config("mistralai/Mixtral-8x7B-Instruct-v0.1"))
        .await
        .unwrap();
    assert_eq!(response.content, "From Together");
    assert_eq!(provider.name(), "together");
}

#[tokio::test]
async fn request_timeout_is_reported_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({"choices": []})),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k").with_base_url(server.uri());
    let config = config("gpt-4o").with_timeout(Duration::from_millis(100));
    let err = provider.complete(user("Hi"), &config).await.unwrap_err();

    assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_millis(100)));
    assert!(err.is_transient());
}

// ============================================================================
// Local servers
// ============================================================================

#[tokio::test]
async fn ollama_generate_request_shape() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3.2",
            "prompt": "Hello",
            "system": "Be brief.",
            "stream": false,
            "options": {"num_predict": 50}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.2",
            "response": "Hi from Ollama",
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 8,
            "eval_count": 4
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri());
    let response = provider
        .complete(
            vec![ChatMessage::system("Be brief."), ChatMessage::user("Hello")],
            &config("llama3.2"),
        )
        .await
        .unwrap();

    assert_eq!(response.content, "Hi from Ollama");
    assert_eq!(response.usage.total(), 12);
    assert_eq!(response.stop_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn ollama_absent_response_is_empty() {
    let server = MockServer::start().await;
    mount_json(&server, "/api/generate", 200, json!({"model": "llama3.2", "done": true})).await;

    let provider = OllamaProvider::new(server.uri());
    let response = provider.complete(user("Hi"), &config("llama3.2")).await.unwrap();
    assert_eq!(response.content, "");
}

#[tokio::test]
async fn ollama_missing_done_is_malformed() {
    let server = MockServer::start().await;
    mount_json(&server, "/api/generate", 200, json!({"error": "model not loaded"})).await;

    let provider = OllamaProvider::new(server.uri());
    let err = provider.complete(user("Hi"), &config("llama3.2")).await.unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)));
}

#[tokio::test]
async fn ollama_health_check_hits_tags_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    assert!(OllamaProvider::new(server.uri()).health_check().await);
    assert!(!OllamaProvider::new("http://127.0.0.1:9").health_check().await);
}

#[tokio::test]
async fn vllm_completions_with_optional_bearer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .and(header("Authorization", "Bearer vllm-key"))
        .and(body_partial_json(json!({
            "model": "meta-llama/Llama-3.2-8B-Instruct",
            "prompt": "Be brief.\n\nHello",
            "max_tokens": 50
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "meta-llama/Llama-3.2-8B-Instruct",
            "choices": [{"index": 0, "text": "Hi from vLLM", "finish_reason": "length"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 4}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = VllmProvider::new(server.uri()).with_api_key("vllm-key");
    let response = provider
        .complete(
            vec![ChatMessage::system("Be brief."), ChatMessage::user("Hello")],
            &config("meta-llama/Llama-3.2-8B-Instruct"),
        )
        .await
        .unwrap();

    assert_eq!(response.content, "Hi from vLLM");
    assert_eq!(response.usage.total(), 9);
}

#[tokio::test]
async fn vllm_null_text_and_missing_choices() {
    let server = MockServer::start().await;
    mount_json(&server, "/null/v1/completions", 200, json!({"choices": [{"text": null}]})).await;
    mount_json(&server, "/missing/v1/completions", 200, json!({"object": "text_completion"})).await;

    let null = VllmProvider::new(format!("{}/null", server.uri()));
    let response = null.complete(user("Hi"), &config("m")).await.unwrap();
    assert_eq!(response.content, "");

    let missing = VllmProvider::new(format!("{}/missing", server.uri()));
    let err = missing.complete(user("Hi"), &config("m")).await.unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)));
}

// ============================================================================
// AWS Bedrock
// ============================================================================

const BEDROCK_CLAUDE: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
const BEDROCK_LLAMA: &str = "meta.llama3-70b-instruct-v1:0";

fn bedrock(server: &MockServer) -> BedrockProvider {
    BedrockProvider::from_config(&json!({
        "region": "us-east-1",
        "endpoint_url": server.uri(),
        "access_key_id": "AKIATESTKEY",
        "secret_access_key": "test-secret"
    }))
    .unwrap()
}

#[tokio::test]
async fn bedrock_claude_invoke_model_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/model/anthropic\.claude[^/]*/invoke$"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": 50,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_bdrk_01",
            "type": "message",
            "content": [{"type": "text", "text": "Hi from Bedrock"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 8, "output_tokens": 4}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = bedrock(&server)
        .complete(user("Hello"), &config(BEDROCK_CLAUDE))
        .await
        .unwrap();

    assert_eq!(response.content, "Hi from Bedrock");
    assert_eq!(response.model, BEDROCK_CLAUDE);
    assert_eq!(response.usage.total(), 12);
}

#[tokio::test]
async fn bedrock_llama_generation_and_null_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/model/meta\.llama3[^/]*/invoke$"))
        .and(body_partial_json(json!({"max_gen_len": 50})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "generation": null,
            "prompt_token_count": 6,
            "generation_token_count": 0,
            "stop_reason": "stop"
        })))
        .mount(&server)
        .await;

    let response = bedrock(&server)
        .complete(user("Hi"), &config(BEDROCK_LLAMA))
        .await
        .unwrap();
    assert_eq!(response.content, "");
}

#[tokio::test]
async fn bedrock_missing_content_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/model/.+/invoke$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .mount(&server)
        .await;

    let err = bedrock(&server)
        .complete(user("Hi"), &config(BEDROCK_CLAUDE))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)), "{:?}", err);
}

#[tokio::test]
async fn bedrock_throttling_and_unavailable_are_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/model/anthropic\.claude[^/]*/invoke$"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-amzn-errortype", "ThrottlingException")
                .set_body_json(json!({"message": "Too many requests, please wait."})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/model/meta\.llama3[^/]*/invoke$"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("x-amzn-errortype", "ServiceUnavailableException")
                .set_body_json(json!({"message": "Service unavailable"})),
        )
        .mount(&server)
        .await;

    let provider = bedrock(&server);

    let err = provider
        .complete(user("Hi"), &config(BEDROCK_CLAUDE))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }), "{:?}", err);
    assert!(err.is_transient());

    let err = provider
        .complete(user("Hi"), &config(BEDROCK_LLAMA))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::ApiError { status: 503, .. }), "{:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn bedrock_rejects_unsupported_model_family_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = bedrock(&server)
        .complete(user("Hi"), &config("amazon.titan-text-express-v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotConfigured(_)));
}
