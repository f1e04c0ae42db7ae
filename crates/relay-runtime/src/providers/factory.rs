//! Provider selection by name.
//!
//! Configuration names a provider type (`anthropic`, `ollama`, ...) plus a
//! bag of JSON settings. A [`ProviderFactory`] turns those settings into a
//! client; the [`ProviderRegistry`] maps type names to factories.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds one kind of provider from its settings.
pub trait ProviderFactory: Send + Sync {
    /// Type name used in configuration, e.g. `"azure-openai"`.
    fn provider_type(&self) -> &'static str;

    /// Build a client. Credentials are resolved here, once.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check settings without building a client.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Model used when a configuration names none.
    fn default_model(&self) -> &'static str;

    /// One-line summary for `relay providers`.
    fn description(&self) -> &'static str;
}

/// A registered provider type, as listed to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub provider_type: &'static str,
    pub default_model: &'static str,
    pub description: &'static str,
}

/// Provider factories keyed by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));

        #[cfg(feature = "openai")]
        {
            registry.register(Arc::new(super::OpenAiProviderFactory));
            registry.register(Arc::new(super::AzureOpenAiProviderFactory));
            registry.register(Arc::new(super::TogetherProviderFactory));
        }

        #[cfg(feature = "local")]
        {
            registry.register(Arc::new(super::OllamaProviderFactory));
            registry.register(Arc::new(super::VllmProviderFactory));
        }

        #[cfg(feature = "bedrock")]
        registry.register(Arc::new(super::BedrockProviderFactory));

        registry
    }

    /// Add a factory, replacing any previous one of the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.provider_type(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(provider_type)?.create(config)
    }

    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factory(provider_type)?.validate_config(config)
    }

    /// Registered type names, sorted.
    pub fn available_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Registered providers with their default model and summary, sorted.
    pub fn catalog(&self) -> Vec<ProviderInfo> {
        self.factories
            .values()
            .map(|factory| ProviderInfo {
                provider_type: factory.provider_type(),
                default_model: factory.default_model(),
                description: factory.description(),
            })
            .collect()
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type '{}' (available: {})",
                provider_type,
                self.available_types().join(", ")
            ))
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

/// Reject a `base_url` setting that is not an http(s) URL.
pub(crate) fn validate_base_url(config: &JsonValue) -> Result<(), ProviderError> {
    match config["base_url"].as_str() {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
            Err(ProviderError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            ))
        }
        _ => Ok(()),
    }
}
