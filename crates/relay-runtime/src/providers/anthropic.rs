//! Anthropic Claude provider implementation.
//!
//! Talks to the Messages API, with optional prompt caching and streaming
//! over server-sent events.
//!
//! ## Security
//!
//! This provider uses the centralized [`ApiCredential`] system for secure
//! credential handling. See the [`secrets`](super::secrets) module for details.

use super::{
    factory::ProviderFactory,
    http,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TextStream,
    TokenUsage,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider.
///
/// # Security
///
/// The API key is stored using [`ApiCredential`] which:
/// - Cannot be accidentally printed via `Debug` or `Display`
/// - Is zeroed on drop
/// - Must be explicitly exposed via `.expose()` when needed
/// - Tracks the credential source for debugging
pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// The API key is immediately wrapped in an [`ApiCredential`] and cannot
    /// be accidentally logged or printed after construction.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "Anthropic API key",
        ))
    }

    /// Create from environment variable.
    ///
    /// Reads `ANTHROPIC_API_KEY` from environment and stores it securely.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(ANTHROPIC_API_KEY_ENV, "Anthropic API key")?;
        Ok(Self::with_credential(credential))
    }

    /// Create from JSON configuration with environment fallback.
    ///
    /// This is the recommended factory method. It:
    /// 1. Checks for `api_key` in the config
    /// 2. Falls back to `ANTHROPIC_API_KEY` environment variable
    /// 3. Returns error if neither is set
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
        )?;

        let provider = Self::with_credential(credential);
        Ok(match config["base_url"].as_str() {
            Some(url) => provider.with_base_url(url),
            None => provider,
        })
    }

    fn with_credential(credential: ApiCredential) -> Self {
        Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a caller-supplied HTTP client (shared connection pool).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        stream: bool,
    ) -> AnthropicRequest {
        // The Messages API carries the system prompt outside the message list
        let mut system = None;
        let mut api_messages = Vec::new();

        for msg in messages {
            if msg.is_system() {
                system = Some(msg.content);
                continue;
            }
            api_messages.push(AnthropicMessage {
                role: msg.role,
                content: vec![ContentBlock::Text {
                    text: msg.content,
                    cache_control: config.prompt_caching.then(|| CacheControl {
                        type_: "ephemeral".to_string(),
                    }),
                }],
            });
        }

        AnthropicRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system,
            messages: api_messages,
            temperature: (config.temperature != 0.0).then_some(config.temperature),
            stream,
        }
    }

    async fn post(
        &self,
        request: &AnthropicRequest,
        config: &CompletionConfig,
    ) -> Result<reqwest::Response, ProviderError> {
        tracing::debug!(
            provider = "anthropic",
            model = %request.model,
            stream = request.stream,
            "Sending messages request"
        );

        // SECURITY: Only expose the credential here, at the point of use
        let builder = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .json(request);

        if request.stream {
            http::send_streaming(builder, config.timeout).await
        } else {
            http::send(builder, config.timeout).await
        }
    }
}

/// Anthropic API request format.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    type_: String,
}

/// Anthropic API response format.
///
/// `content` is the required result structure; everything else is optional.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlockResponse>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}

/// Server-sent event payloads; only text deltas and errors matter.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: StreamDelta },
    Error { error: AnthropicErrorDetail },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

/// Convert a decoded reply into the provider-neutral response.
fn into_completion(body: AnthropicResponse, requested_model: &str) -> CompletionResponse {
    // Blocks without text (tool use, thinking) contribute nothing
    let content = body
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    CompletionResponse {
        content,
        usage: TokenUsage {
            prompt_tokens: body.usage.input_tokens,
            completion_tokens: body.usage.output_tokens,
            cache_read_tokens: body.usage.cache_read_input_tokens,
            cache_creation_tokens: body.usage.cache_creation_input_tokens,
        },
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        stop_reason: body.stop_reason,
    }
}

/// Parse one SSE `data:` payload into an optional text delta.
fn parse_stream_event(data: &str) -> Result<Option<String>, ProviderError> {
    match http::decode::<StreamEvent>(data)? {
        StreamEvent::ContentBlockDelta {
            delta: StreamDelta::TextDelta { text },
        } => Ok(Some(text)),
        StreamEvent::Error { error } => Err(ProviderError::Stream(format!(
            "{}: {}",
            error.type_, error.message
        ))),
        _ => Ok(None),
    }
}

/// Turn raw server-sent events into text deltas.
///
/// The stream ends after the first error it yields, and a gap longer than
/// `idle` between two events is a [`ProviderError::Timeout`].
fn text_deltas<S, E>(
    events: S,
    idle: Duration,
) -> impl futures::Stream<Item = Result<String, ProviderError>>
where
    S: futures::Stream<Item = Result<eventsource_stream::Event, E>> + Unpin,
    E: std::fmt::Display,
{
    futures::stream::unfold(Some(events), move |events| async move {
        let mut events = events?;
        loop {
            let event = match tokio::time::timeout(idle, events.next()).await {
                Ok(event) => event?,
                Err(_) => return Some((Err(ProviderError::Timeout(idle)), None)),
            };
            match event.map_err(|e| ProviderError::Stream(e.to_string())) {
                Ok(event) => match parse_stream_event(&event.data) {
                    Ok(Some(text)) => return Some((Ok(text), Some(events))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), None)),
                },
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = self.build_request(messages, config, false);
        let response = self.post(&request, config).await?;
        let body: AnthropicResponse = http::read_json(response, config.timeout).await?;

        Ok(into_completion(body, &config.model))
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<TextStream, ProviderError> {
        let request = self.build_request(messages, config, true);
        let response = self.post(&request, config).await?;

        let events = response.bytes_stream().eventsource().boxed();
        Ok(text_deltas(events, config.timeout).boxed())
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn health_check(&self) -> bool {
        // Simple check - verify API key is set (without logging the value)
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Factory for creating Anthropic providers from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-ant-...",           // Optional, falls back to ANTHROPIC_API_KEY env
///   "base_url": "https://..."          // Optional, custom API endpoint
/// }
/// ```
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let provider = AnthropicProvider::from_config(config)?;
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        // Check credential availability without loading
        if !ApiCredential::is_available(config, "api_key", ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Anthropic API key required: set 'api_key' in config or {} env",
                ANTHROPIC_API_KEY_ENV
            )));
        }

        super::factory::validate_base_url(config)
    }

    fn default_model(&self) -> &'static str {
        "claude-3-5-sonnet-20241022"
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude Messages API with streaming support"
    }
}
