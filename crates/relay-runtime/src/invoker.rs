//! Resilient invocation: bounded retry on the primary provider, then one
//! fallback call.
//!
//! ```text
//! primary ──fail──▶ sleep base ──▶ primary ──fail──▶ sleep 2·base ──▶ primary
//!    │                                │                                  │
//!    └──ok──▶ text                    └──ok──▶ text                      └──fail──▶ fallback (once)
//! ```
//!
//! Only transient errors are retried. A malformed response ends the
//! invocation immediately; any other non-transient error skips the remaining
//! primary attempts and goes straight to the fallback.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, RelayConfig};
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, ProviderRegistry, TextStream,
};
use crate::resilience::RetryPolicy;
use crate::usage::LlmUsage;

/// Errors from [`ResilientInvoker`].
#[derive(Error, Debug)]
pub enum InvokeError {
    /// The overall deadline in [`InvokeOptions::timeout`] expired.
    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The primary returned a response that cannot be interpreted.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(
        "All providers failed: primary gave up after {primary_attempts} attempt(s) ({primary_error}), fallback failed: {last}"
    )]
    AllProvidersFailed {
        primary_attempts: u32,
        primary_error: ProviderError,
        #[source]
        last: ProviderError,
    },
}

/// A provider together with the request settings used against it.
#[derive(Clone)]
pub struct Target {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
}

impl Target {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("provider", &self.provider.name())
            .field("model", &self.config.model)
            .finish()
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Model for the primary provider; the fallback keeps its own
    pub model: Option<String>,

    /// Output token bound for both providers
    pub max_tokens: Option<u32>,

    /// Deadline for the whole invocation, backoff sleeps included
    pub timeout: Option<Duration>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    /// Extracted text; empty when the provider returned none
    pub text: String,

    /// Name of the provider that answered
    pub provider: String,

    /// Model that answered
    pub model: String,

    /// Primary calls made
    pub attempts: u32,

    /// Whether the fallback produced the text
    pub used_fallback: bool,

    /// Usage of the answering call
    pub usage: LlmUsage,
}

struct Answered<T> {
    value: T,
    attempts: u32,
    used_fallback: bool,
}

/// Calls a primary provider with bounded linear-backoff retry and falls
/// back to a second provider once the retries are spent.
///
/// Holds no mutable state; share it by reference or `Arc` across tasks.
#[derive(Debug, Clone)]
pub struct ResilientInvoker {
    primary: Target,
    fallback: Target,
    retry: RetryPolicy,
}

impl ResilientInvoker {
    /// Invoker with the default policy (3 attempts, 1s base delay).
    pub fn new(primary: Target, fallback: Target) -> Self {
        Self {
            primary,
            fallback,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build both providers through the registry.
    ///
    /// Provider settings are validated first, so a bad `base_url` or a
    /// missing credential fails here rather than on the first request.
    pub fn from_config(
        config: &RelayConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        config.validate_providers(registry)?;

        let primary =
            registry.create(&config.primary.provider, &config.primary.factory_settings())?;
        let fallback =
            registry.create(&config.fallback.provider, &config.fallback.factory_settings())?;

        tracing::debug!(
            primary = %config.primary.provider,
            primary_model = %config.primary.model,
            fallback = %config.fallback.provider,
            fallback_model = %config.fallback.model,
            max_retries = config.retry.max_retries,
            "Invoker configured"
        );

        Ok(Self::new(
            Target::new(primary, config.completion_config(&config.primary)),
            Target::new(fallback, config.completion_config(&config.fallback)),
        )
        .with_retry_policy(config.retry))
    }

    pub fn primary(&self) -> &Target {
        &self.primary
    }

    pub fn fallback(&self) -> &Target {
        &self.fallback
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send `prompt` as a single user message and return the answer text.
    pub async fn invoke(
        &self,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<String, InvokeError> {
        self.invoke_detailed(prompt, options)
            .await
            .map(|invocation| invocation.text)
    }

    /// Like [`invoke`](Self::invoke), returning the full [`Invocation`].
    pub async fn invoke_detailed(
        &self,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<Invocation, InvokeError> {
        self.invoke_messages(vec![ChatMessage::user(prompt)], options)
            .await
    }

    /// Invoke with a full conversation (system prompt, prior turns).
    pub async fn invoke_messages(
        &self,
        messages: Vec<ChatMessage>,
        options: &InvokeOptions,
    ) -> Result<Invocation, InvokeError> {
        let messages = &messages;
        let call = |provider: Arc<dyn LlmProvider>, config: CompletionConfig| {
            let messages = messages.clone();
            async move {
                let response = provider.complete(messages, &config).await?;
                let model = if response.model.is_empty() {
                    config.model
                } else {
                    response.model
                };
                Ok::<_, ProviderError>((response.content, model, response.usage))
            }
        };

        let answered = within(options.timeout, self.run(options, call)).await?;
        let (text, model, usage) = answered.value;
        let target = self.answering(answered.used_fallback);

        Ok(Invocation {
            text,
            provider: target.name().to_string(),
            usage: LlmUsage::from_response(&usage, &model),
            model,
            attempts: answered.attempts,
            used_fallback: answered.used_fallback,
        })
    }

    /// Open a text stream with the same retry and fallback rules.
    ///
    /// Retries and the deadline cover opening the stream only; errors
    /// inside an open stream are yielded to the caller. Providers without
    /// incremental streaming answer with a single chunk.
    pub async fn stream(
        &self,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<TextStream, InvokeError> {
        self.stream_messages(vec![ChatMessage::user(prompt)], options)
            .await
    }

    /// Stream a full conversation; see [`stream`](Self::stream).
    pub async fn stream_messages(
        &self,
        messages: Vec<ChatMessage>,
        options: &InvokeOptions,
    ) -> Result<TextStream, InvokeError> {
        let messages = &messages;
        let call = |provider: Arc<dyn LlmProvider>, config: CompletionConfig| {
            let messages = messages.clone();
            async move { open_stream(provider, messages, config).await }
        };

        let answered = within(options.timeout, self.run(options, call)).await?;
        tracing::debug!(
            provider = %self.answering(answered.used_fallback).name(),
            attempts = answered.attempts,
            "Stream opened"
        );
        Ok(answered.value)
    }

    async fn run<T, F, Fut>(
        &self,
        options: &InvokeOptions,
        call: F,
    ) -> Result<Answered<T>, InvokeError>
    where
        F: Fn(Arc<dyn LlmProvider>, CompletionConfig) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let primary_config = self.primary_config(options);
        let attempts = AtomicU32::new(0);

        let result = {
            let target = &self.primary;
            let config = &primary_config;
            let attempts = &attempts;
            let call = &call;

            (|| {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    provider = %target.name(),
                    model = %config.model,
                    attempt,
                    "Calling primary provider"
                );
                call(Arc::clone(&target.provider), config.clone())
            })
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(ProviderError::is_transient)
            .notify(|error: &ProviderError, delay: Duration| {
                tracing::warn!(
                    provider = %target.name(),
                    error = %error,
                    delay = ?delay,
                    "Primary provider failed, retrying"
                );
            })
            .await
        };

        let primary_attempts = attempts.into_inner();
        let primary_error = match result {
            Ok(value) => {
                return Ok(Answered {
                    value,
                    attempts: primary_attempts,
                    used_fallback: false,
                })
            }
            Err(error) if error.is_fatal() => {
                tracing::error!(
                    provider = %self.primary.name(),
                    error = %error,
                    "Primary provider returned an unusable response"
                );
                return Err(InvokeError::Provider(error));
            }
            Err(error) => error,
        };

        tracing::warn!(
            primary = %self.primary.name(),
            fallback = %self.fallback.name(),
            attempts = primary_attempts,
            error = %primary_error,
            "Primary provider exhausted, trying fallback"
        );

        let fallback_config = self.fallback_config(options);
        match call(Arc::clone(&self.fallback.provider), fallback_config).await {
            Ok(value) => Ok(Answered {
                value,
                attempts: primary_attempts,
                used_fallback: true,
            }),
            Err(last) => {
                tracing::error!(
                    fallback = %self.fallback.name(),
                    error = %last,
                    "Fallback provider failed"
                );
                Err(InvokeError::AllProvidersFailed {
                    primary_attempts,
                    primary_error,
                    last,
                })
            }
        }
    }

    fn answering(&self, used_fallback: bool) -> &Target {
        if used_fallback {
            &self.fallback
        } else {
            &self.primary
        }
    }

    fn primary_config(&self, options: &InvokeOptions) -> CompletionConfig {
        let mut config = self.primary.config.clone();
        if let Some(model) = &options.model {
            config.model = model.clone();
        }
        if let Some(max_tokens) = options.max_tokens {
            config.max_tokens = max_tokens;
        }
        config
    }

    fn fallback_config(&self, options: &InvokeOptions) -> CompletionConfig {
        let mut config = self.fallback.config.clone();
        if let Some(max_tokens) = options.max_tokens {
            config.max_tokens = max_tokens;
        }
        config
    }
}

async fn within<T, Fut>(deadline: Option<Duration>, future: Fut) -> Result<T, InvokeError>
where
    Fut: Future<Output = Result<T, InvokeError>>,
{
    let Some(deadline) = deadline else {
        return future.await;
    };

    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(timeout = ?deadline, "Invocation deadline expired");
            Err(InvokeError::Timeout(deadline))
        }
    }
}

async fn open_stream(
    provider: Arc<dyn LlmProvider>,
    messages: Vec<ChatMessage>,
    config: CompletionConfig,
) -> Result<TextStream, ProviderError> {
    if provider.supports_streaming() {
        return provider.stream(messages, &config).await;
    }

    let response = provider.complete(messages, &config).await?;
    Ok(futures::stream::iter([Ok(response.content)]).boxed())
}
