//! Locally hosted inference servers: Ollama and vLLM.
//!
//! Both take a single prompt string rather than a message list, so chat
//! messages are flattened before sending. Neither requires authentication
//! by default.

use super::{
    factory::{validate_base_url, ProviderFactory},
    http,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the Ollama base URL.
pub const OLLAMA_URL_ENV: &str = "OLLAMA_URL";

/// Environment variable holding the vLLM base URL.
pub const VLLM_URL_ENV: &str = "VLLM_URL";

/// Optional bearer key for vLLM servers started with `--api-key`.
pub const VLLM_API_KEY_ENV: &str = "VLLM_API_KEY";

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const VLLM_DEFAULT_URL: &str = "http://localhost:8000";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Split messages into an optional system prompt and a single prompt body.
fn flatten_messages(messages: Vec<ChatMessage>) -> (Option<String>, String) {
    let mut system = None;
    let mut parts = Vec::new();

    for msg in messages {
        if msg.is_system() {
            system = Some(msg.content);
        } else {
            parts.push(msg.content);
        }
    }

    (system, parts.join("\n\n"))
}

/// Resolve a base URL from config, then environment, then default.
fn resolve_base_url(config: &JsonValue, env_var: &str, default: &str) -> String {
    config["base_url"]
        .as_str()
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

async fn is_reachable(client: &reqwest::Client, url: String) -> bool {
    client
        .get(url)
        .timeout(HEALTH_TIMEOUT)
        .send()
        .await
        .map(|response| response.status().is_success())
        .unwrap_or(false)
}

// ============================================================================
// Ollama
// ============================================================================

/// Ollama `/api/generate` client.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the Ollama server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from `OLLAMA_URL`, defaulting to `http://localhost:11434`.
    pub fn from_env() -> Self {
        Self::new(resolve_base_url(&JsonValue::Null, OLLAMA_URL_ENV, OLLAMA_DEFAULT_URL))
    }

    /// Use a caller-supplied HTTP client (shared connection pool).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// `done` marks a complete (non-streamed) generation; `response` may be
/// missing or null for an empty generation.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[allow(dead_code)] // Required for shape validation, not read directly
    done: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let (system, prompt) = flatten_messages(messages);
        let request = GenerateRequest {
            model: config.model.clone(),
            prompt,
            system,
            stream: false,
            options: GenerateOptions {
                num_predict: config.max_tokens,
                temperature: (config.temperature != 0.0).then_some(config.temperature),
            },
        };

        tracing::debug!(
            provider = "ollama",
            model = %config.model,
            base_url = %self.base_url,
            "Sending generate request"
        );

        let builder = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request);
        let response = http::send(builder, config.timeout).await?;
        let body: GenerateResponse = http::read_json(response, config.timeout).await?;

        Ok(CompletionResponse {
            content: body.response.unwrap_or_default(),
            usage: TokenUsage {
                prompt_tokens: body.prompt_eval_count,
                completion_tokens: body.eval_count,
                ..TokenUsage::default()
            },
            model: body.model.unwrap_or_else(|| config.model.clone()),
            stop_reason: body.done_reason,
        })
    }

    async fn health_check(&self) -> bool {
        is_reachable(&self.client, format!("{}/api/tags", self.base_url)).await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Factory for Ollama.
///
/// ## Configuration Format
/// ```json
/// { "base_url": "http://localhost:11434" }   // Optional, falls back to OLLAMA_URL env
/// ```
pub struct OllamaProviderFactory;

impl ProviderFactory for OllamaProviderFactory {
    fn provider_type(&self) -> &'static str {
        "ollama"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OllamaProvider::new(resolve_base_url(
            config,
            OLLAMA_URL_ENV,
            OLLAMA_DEFAULT_URL,
        ))))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        validate_base_url(config)
    }

    fn default_model(&self) -> &'static str {
        "llama3.2"
    }

    fn description(&self) -> &'static str {
        "Ollama local inference server"
    }
}

// ============================================================================
// vLLM
// ============================================================================

/// vLLM OpenAI-compatible `/v1/completions` client.
pub struct VllmProvider {
    base_url: String,
    credential: Option<ApiCredential>,
    client: reqwest::Client,
}

impl std::fmt::Debug for VllmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VllmProvider")
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish()
    }
}

impl VllmProvider {
    /// Create a provider for the vLLM server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: None,
            client: reqwest::Client::new(),
        }
    }

    /// Attach a bearer key for servers started with `--api-key`.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.credential = Some(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "vLLM API key",
        ));
        self
    }

    /// Use a caller-supplied HTTP client (shared connection pool).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[derive(Debug, Serialize)]
struct CompletionsRequest {
    model: String,
    prompt: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    choices: Vec<CompletionsChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<CompletionsUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionsChoice {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionsUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for VllmProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let (system, prompt) = flatten_messages(messages);
        let prompt = match system {
            Some(system) => format!("{}\n\n{}", system, prompt),
            None => prompt,
        };
        let request = CompletionsRequest {
            model: config.model.clone(),
            prompt,
            max_tokens: config.max_tokens,
            temperature: (config.temperature != 0.0).then_some(config.temperature),
        };

        tracing::debug!(
            provider = "vllm",
            model = %config.model,
            base_url = %self.base_url,
            "Sending completions request"
        );

        let builder = self
            .client
            .post(format!("{}/v1/completions", self.base_url))
            .json(&request);
        let builder = match &self.credential {
            Some(credential) => builder.bearer_auth(credential.expose()),
            None => builder,
        };

        let response = http::send(builder, config.timeout).await?;
        let body: CompletionsResponse = http::read_json(response, config.timeout).await?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            ProviderError::MalformedResponse("response contained no choices".to_string())
        })?;
        let usage = body.usage.unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.text.unwrap_or_default(),
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                ..TokenUsage::default()
            },
            model: body.model.unwrap_or_else(|| config.model.clone()),
            stop_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        is_reachable(&self.client, format!("{}/health", self.base_url)).await
    }

    fn name(&self) -> &str {
        "vllm"
    }
}

/// Factory for vLLM.
///
/// ## Configuration Format
/// ```json
/// {
///   "base_url": "http://localhost:8000",   // Optional, falls back to VLLM_URL env
///   "api_key": "..."                       // Optional, falls back to VLLM_API_KEY env
/// }
/// ```
pub struct VllmProviderFactory;

impl ProviderFactory for VllmProviderFactory {
    fn provider_type(&self) -> &'static str {
        "vllm"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let mut provider =
            VllmProvider::new(resolve_base_url(config, VLLM_URL_ENV, VLLM_DEFAULT_URL));

        if ApiCredential::is_available(config, "api_key", VLLM_API_KEY_ENV) {
            provider.credential = Some(ApiCredential::from_config_or_env(
                config,
                "api_key",
                VLLM_API_KEY_ENV,
                "vLLM API key",
            )?);
        }

        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        validate_base_url(config)
    }

    fn default_model(&self) -> &'static str {
        "meta-llama/Llama-3.2-8B-Instruct"
    }

    fn description(&self) -> &'static str {
        "vLLM high-throughput inference server"
    }
}
