//! # relay-runtime
//!
//! Resilient LLM invocation: bounded retry with linear backoff against a
//! primary provider, then a single call to a fallback provider.
//!
//! Providers sit behind the [`LlmProvider`] trait and are selected by
//! configuration through a [`ProviderRegistry`]. Compiled-in back ends are
//! gated by features:
//!
//! | Feature | Providers |
//! |---------|-----------|
//! | `anthropic` | Anthropic Messages API |
//! | `openai` | OpenAI, Azure OpenAI, Together AI |
//! | `local` | Ollama, vLLM |
//! | `bedrock` | AWS Bedrock (Claude and Llama models) |
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_runtime::{InvokeOptions, ProviderRegistry, RelayConfig, ResilientInvoker};
//!
//! let config = RelayConfig::from_env()?;
//! let invoker = ResilientInvoker::from_config(&config, &ProviderRegistry::with_defaults())?;
//!
//! let answer = invoker
//!     .invoke("Where is my order?", &InvokeOptions::default())
//!     .await?;
//! ```

pub mod config;
pub mod invoker;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod usage;

pub use config::{ConfigError, RelayConfig, TargetConfig};
pub use invoker::{InvokeError, InvokeOptions, Invocation, ResilientInvoker, Target};
pub use prompts::Task;
pub use providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    ProviderFactory, ProviderRegistry, TextStream, TokenUsage,
};
pub use resilience::RetryPolicy;
pub use usage::LlmUsage;
