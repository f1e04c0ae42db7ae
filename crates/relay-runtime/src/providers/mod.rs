//! LLM Provider abstractions for relay-runtime.
//!
//! This module defines the trait every text-generation backend implements
//! and includes clients for Anthropic, OpenAI-compatible endpoints (OpenAI,
//! Azure OpenAI, Together AI), AWS Bedrock and local inference servers
//! (Ollama, vLLM).
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for secure credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(any(feature = "anthropic", feature = "openai", feature = "local"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "local")]
mod local;

#[cfg(feature = "bedrock")]
mod bedrock;

pub use factory::{ProviderFactory, ProviderInfo, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialBuilder, CredentialSet, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{
    AzureOpenAiProviderFactory, OpenAiAuth, OpenAiProvider, OpenAiProviderFactory,
    TogetherProviderFactory,
};

#[cfg(feature = "local")]
pub use local::{OllamaProvider, OllamaProviderFactory, VllmProvider, VllmProviderFactory};

#[cfg(feature = "bedrock")]
pub use bedrock::{BedrockProvider, BedrockProviderFactory, ModelFamily};

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether a retry against the same endpoint may succeed.
    ///
    /// Connection failures, rate limiting, request timeouts and server-side
    /// (408, 5xx) statuses are transient. Everything else fails the same way
    /// on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the error must surface to the caller without trying another
    /// provider.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::MalformedResponse(_))
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 leaves the provider default in place)
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,

    /// Enable prompt caching (Anthropic-specific)
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1000,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
            prompt_caching: false,
        }
    }
}

impl CompletionConfig {
    /// Create a config for the given model with default limits.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the output token bound.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Whether this is a system message.
    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content, empty when the provider returned no text
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Tokens read from cache (Anthropic)
    pub cache_read_tokens: u32,

    /// Tokens written to cache (Anthropic)
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Incremental text produced by a streaming completion.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// Provider abstraction allows swapping LLM backends.
///
/// The invoker only ever talks to this trait; which backend sits behind it
/// is decided by configuration through [`ProviderRegistry`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Whether [`stream`](Self::stream) yields incremental deltas.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream a chat completion as text deltas.
    async fn stream(
        &self,
        _messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<TextStream, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "{} does not support streaming",
            self.name()
        )))
    }

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Get provider name for logs and diagnostics.
    fn name(&self) -> &str;
}
