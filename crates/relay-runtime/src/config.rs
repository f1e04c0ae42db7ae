//! Process-start configuration for the invoker.
//!
//! A [`RelayConfig`] names the primary and fallback targets (provider type,
//! model and provider-specific settings), the retry policy and request
//! limits. It is loaded once, from YAML or from environment-style key/value
//! lookups, and never re-read per call.
//!
//! ```yaml
//! primary:
//!   provider: anthropic
//!   model: claude-3-5-sonnet-20241022
//! fallback:
//!   provider: ollama
//!   model: llama3.2
//!   base_url: http://localhost:11434
//! retry:
//!   max_retries: 3
//!   base_delay: 1s
//! max_tokens: 1000
//! request_timeout: 30s
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::providers::{CompletionConfig, ProviderError, ProviderRegistry};
use crate::resilience::{humantime_duration, RetryPolicy};

/// Primary provider type (`anthropic`, `openai`, `ollama`, ...).
pub const PRIMARY_PROVIDER_ENV: &str = "RELAY_PRIMARY_PROVIDER";
/// Primary model identifier.
pub const PRIMARY_MODEL_ENV: &str = "RELAY_PRIMARY_MODEL";
/// Fallback provider type.
pub const FALLBACK_PROVIDER_ENV: &str = "RELAY_FALLBACK_PROVIDER";
/// Fallback model identifier.
pub const FALLBACK_MODEL_ENV: &str = "RELAY_FALLBACK_MODEL";
/// Total primary attempts.
pub const MAX_RETRIES_ENV: &str = "RELAY_MAX_RETRIES";
/// Backoff base delay (`500ms`, `1s`).
pub const BASE_DELAY_ENV: &str = "RELAY_BASE_DELAY";
/// Default output token bound.
pub const MAX_TOKENS_ENV: &str = "RELAY_MAX_TOKENS";
/// Per-request HTTP timeout.
pub const REQUEST_TIMEOUT_ENV: &str = "RELAY_REQUEST_TIMEOUT";

const REDACTED: &str = "[REDACTED]";

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// One provider endpoint: type, model and provider-specific settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Registered provider type
    pub provider: String,

    /// Model identifier sent to the provider
    pub model: String,

    /// Everything else (`api_key`, `base_url`, `deployment`, ...)
    #[serde(flatten)]
    pub settings: Map<String, JsonValue>,
}

impl TargetConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            settings: Map::new(),
        }
    }

    /// Add a provider-specific setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Settings handed to the provider factory; includes `model`.
    pub fn factory_settings(&self) -> JsonValue {
        let mut settings = self.settings.clone();
        settings
            .entry("model")
            .or_insert_with(|| JsonValue::String(self.model.clone()));
        JsonValue::Object(settings)
    }

    fn redacted(&self) -> Self {
        let settings = self
            .settings
            .iter()
            .map(|(key, value)| {
                let value = if is_secret_key(key) {
                    JsonValue::String(REDACTED.to_string())
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect();

        Self {
            provider: self.provider.clone(),
            model: self.model.clone(),
            settings,
        }
    }
}

// Settings may carry API keys, so only their names are printed
impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("key") || key.contains("secret") || key.contains("token")
}

/// Configuration for a [`ResilientInvoker`](crate::ResilientInvoker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// First-choice endpoint
    pub primary: TargetConfig,

    /// Endpoint tried once after the primary's retries are exhausted
    pub fallback: TargetConfig,

    /// Primary attempt bound and backoff
    pub retry: RetryPolicy,

    /// Default output token bound
    pub max_tokens: u32,

    /// Per-request HTTP timeout
    #[serde(with = "humantime_duration")]
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            primary: TargetConfig::new("anthropic", "claude-3-5-sonnet-20241022"),
            fallback: TargetConfig::new("ollama", "llama3.2"),
            retry: RetryPolicy::default(),
            max_tokens: 1000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Parse and validate YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by a key/value lookup using the `RELAY_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_lookup(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from a key/value lookup; unset keys are left alone.
    pub fn apply_lookup<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup(PRIMARY_PROVIDER_ENV) {
            self.primary.provider = provider;
        }
        if let Some(model) = lookup(PRIMARY_MODEL_ENV) {
            self.primary.model = model;
        }
        if let Some(provider) = lookup(FALLBACK_PROVIDER_ENV) {
            self.fallback.provider = provider;
        }
        if let Some(model) = lookup(FALLBACK_MODEL_ENV) {
            self.fallback.model = model;
        }
        if let Some(value) = lookup(MAX_RETRIES_ENV) {
            self.retry.max_retries = parse_number(MAX_RETRIES_ENV, &value)?;
        }
        if let Some(value) = lookup(BASE_DELAY_ENV) {
            self.retry.base_delay = parse_duration(BASE_DELAY_ENV, &value)?;
        }
        if let Some(value) = lookup(MAX_TOKENS_ENV) {
            self.max_tokens = parse_number(MAX_TOKENS_ENV, &value)?;
        }
        if let Some(value) = lookup(REQUEST_TIMEOUT_ENV) {
            self.request_timeout = parse_duration(REQUEST_TIMEOUT_ENV, &value)?;
        }
        Ok(())
    }

    /// Structural checks that need no provider knowledge.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        for (role, target) in [("primary", &self.primary), ("fallback", &self.fallback)] {
            if target.provider.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{}.provider is empty", role)));
            }
            if target.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{}.model is empty", role)));
            }
        }
        Ok(())
    }

    /// Check both targets against the registered provider factories.
    pub fn validate_providers(&self, registry: &ProviderRegistry) -> Result<(), ConfigError> {
        for target in [&self.primary, &self.fallback] {
            registry.validate(&target.provider, &target.factory_settings())?;
        }
        Ok(())
    }

    /// Request settings for one target.
    pub fn completion_config(&self, target: &TargetConfig) -> CompletionConfig {
        CompletionConfig::new(target.model.clone())
            .with_max_tokens(self.max_tokens)
            .with_timeout(self.request_timeout)
    }

    /// Copy with secret-looking settings replaced, safe to print.
    pub fn redacted(&self) -> Self {
        Self {
            primary: self.primary.redacted(),
            fallback: self.fallback.redacted(),
            ..self.clone()
        }
    }

    /// Serialize as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.primary.provider, "anthropic");
        assert_eq!(config.primary.model, "claude-3-5-sonnet-20241022");
        assert_eq!(config.fallback.provider, "ollama");
        assert_eq!(config.fallback.model, "llama3.2");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
primary:
  provider: openai
  model: gpt-4o-mini
  base_url: https://gateway.internal/v1
fallback:
  provider: vllm
  model: meta-llama/Llama-3.2-8B-Instruct
retry:
  max_retries: 5
  base_delay: 250ms
max_tokens: 200
request_timeout: 10s
"#;
        let config = RelayConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.primary.provider, "openai");
        assert_eq!(
            config.primary.settings["base_url"],
            "https://gateway.internal/v1"
        );
        assert_eq!(config.fallback.provider, "vllm");
        assert_eq!(config.retry, RetryPolicy::new(5, Duration::from_millis(250)));
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_partial_uses_defaults() {
        let config = RelayConfig::from_yaml_str("max_tokens: 50\n").unwrap();
        assert_eq!(config.max_tokens, 50);
        assert_eq!(config.primary.provider, "anthropic");
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_yaml_rejects_zero_retries() {
        let result = RelayConfig::from_yaml_str("retry:\n  max_retries: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            (PRIMARY_PROVIDER_ENV, "together"),
            (PRIMARY_MODEL_ENV, "mistralai/Mixtral-8x7B-Instruct-v0.1"),
            (FALLBACK_MODEL_ENV, "mistral"),
            (MAX_RETRIES_ENV, "4"),
            (BASE_DELAY_ENV, "2s"),
            (REQUEST_TIMEOUT_ENV, "45s"),
        ]))
        .unwrap();

        assert_eq!(config.primary.provider, "together");
        assert_eq!(config.primary.model, "mistralai/Mixtral-8x7B-Instruct-v0.1");
        assert_eq!(config.fallback.provider, "ollama");
        assert_eq!(config.fallback.model, "mistral");
        assert_eq!(config.retry, RetryPolicy::new(4, Duration::from_secs(2)));
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.request_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let err = RelayConfig::from_lookup(lookup(&[(MAX_RETRIES_ENV, "three")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == MAX_RETRIES_ENV));

        let err = RelayConfig::from_lookup(lookup(&[(BASE_DELAY_ENV, "soonish")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == BASE_DELAY_ENV));
    }

    #[test]
    fn test_factory_settings_include_model() {
        let target =
            TargetConfig::new("azure-openai", "gpt-4").with_setting("api_version", "2024-06-01");
        let settings = target.factory_settings();
        assert_eq!(settings["model"], "gpt-4");
        assert_eq!(settings["api_version"], "2024-06-01");
    }

    #[test]
    fn test_secrets_are_redacted() {
        let config = RelayConfig {
            primary: TargetConfig::new("openai", "gpt-4o-mini")
                .with_setting("api_key", "sk-very-secret")
                .with_setting("base_url", "https://api.openai.com/v1"),
            ..RelayConfig::default()
        };

        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-very-secret"));

        let yaml = config.redacted().to_yaml().unwrap();
        assert!(!yaml.contains("sk-very-secret"));
        assert!(yaml.contains(REDACTED));
        assert!(yaml.contains("https://api.openai.com/v1"));
    }

    #[test]
    fn test_completion_config_for_target() {
        let config = RelayConfig::default();
        let completion = config.completion_config(&config.fallback);
        assert_eq!(completion.model, "llama3.2");
        assert_eq!(completion.max_tokens, 1000);
        assert_eq!(completion.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = RelayConfig::from_file("/nonexistent/relay.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.yaml"));
    }

    #[cfg(feature = "all-providers")]
    #[test]
    fn test_validate_providers_rejects_unknown_type() {
        let config = RelayConfig {
            fallback: TargetConfig::new("cohere", "command-r"),
            ..RelayConfig::default()
        };
        let registry = ProviderRegistry::with_defaults();
        let err = config.validate_providers(&registry).unwrap_err();
        assert!(err.to_string().contains("cohere"));
    }
}
