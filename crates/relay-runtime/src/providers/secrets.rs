//! Credential handling for provider clients.
//!
//! API keys are wrapped in [`ApiCredential`] as soon as they are read, so
//! they cannot end up in `Debug`/`Display` output, tracing fields or error
//! messages. The raw value is only reachable through [`ApiCredential::expose`],
//! which providers call while building the request header.
//!
//! Credentials are resolved once, when a provider is constructed. Lookup
//! order is always: provider settings (`api_key` etc.), then the provider's
//! environment variable.
//!
//! ## Usage
//!
//! ```ignore
//! use relay_runtime::providers::{ApiCredential, CredentialBuilder};
//!
//! let key = ApiCredential::from_config_or_env(&settings, "api_key", "OPENAI_API_KEY", "OpenAI API key")?;
//! request.bearer_auth(key.expose());
//!
//! let azure = CredentialBuilder::new()
//!     .require("api_key", "AZURE_OPENAI_API_KEY", "Azure OpenAI API key")
//!     .require("endpoint", "AZURE_OPENAI_ENDPOINT", "Azure OpenAI endpoint")
//!     .build(&settings)?;
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider settings in the configuration file
    Config,
    /// Environment variable
    Environment,
    /// Passed directly to a constructor
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A secret provider setting (API key, or a private endpoint).
///
/// `Debug` and `Display` print `[REDACTED]`; the value is zeroed on drop.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a value. `name` is the human-readable label used in errors.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load from an environment variable.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| {
                ProviderError::NotConfigured(format!(
                    "{} not set: configure '{}' environment variable",
                    name, env_var
                ))
            })
    }

    /// Load from provider settings, falling back to an environment variable.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::from_config_or_lookup(config, config_key, env_var, name, |key| {
            std::env::var(key).ok()
        })
    }

    /// Same as [`from_config_or_env`](Self::from_config_or_env) with a
    /// caller-supplied key/value lookup in place of the process environment.
    pub fn from_config_or_lookup<F>(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
        lookup: F,
    ) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        match lookup(env_var) {
            Some(value) => Ok(Self::new(value, CredentialSource::Environment, name)),
            None => Err(ProviderError::NotConfigured(format!(
                "{} required: set '{}' in config or {} environment variable",
                name, config_key, env_var
            ))),
        }
    }

    /// Whether the setting can be resolved, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some() || std::env::var(env_var).is_ok()
    }

    /// The raw value. Call at the point of use only; never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

struct CredentialSpec {
    config_key: &'static str,
    env_var: &'static str,
    name: &'static str,
    required: bool,
}

/// Loads several secret settings for one provider.
#[derive(Default)]
pub struct CredentialBuilder {
    specs: Vec<CredentialSpec>,
}

impl CredentialBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A setting that must resolve for `build` to succeed.
    pub fn require(
        mut self,
        config_key: &'static str,
        env_var: &'static str,
        name: &'static str,
    ) -> Self {
        self.specs.push(CredentialSpec {
            config_key,
            env_var,
            name,
            required: true,
        });
        self
    }

    /// A setting that is loaded when present and skipped otherwise.
    pub fn optional(
        mut self,
        config_key: &'static str,
        env_var: &'static str,
        name: &'static str,
    ) -> Self {
        self.specs.push(CredentialSpec {
            config_key,
            env_var,
            name,
            required: false,
        });
        self
    }

    /// Resolve every setting against `config` and the environment.
    pub fn build(self, config: &JsonValue) -> Result<CredentialSet, ProviderError> {
        let mut credentials = BTreeMap::new();

        for spec in self.specs {
            if !spec.required && !ApiCredential::is_available(config, spec.config_key, spec.env_var)
            {
                continue;
            }
            let cred = ApiCredential::from_config_or_env(
                config,
                spec.config_key,
                spec.env_var,
                spec.name,
            )?;
            credentials.insert(spec.config_key, cred);
        }

        Ok(CredentialSet { credentials })
    }
}

/// Settings resolved by a [`CredentialBuilder`], keyed by config key.
pub struct CredentialSet {
    credentials: BTreeMap<&'static str, ApiCredential>,
}

impl CredentialSet {
    /// A required setting.
    pub fn get(&self, key: &str) -> Result<&ApiCredential, ProviderError> {
        self.credentials
            .get(key)
            .ok_or_else(|| ProviderError::NotConfigured(format!("Credential '{}' not found", key)))
    }

    pub fn get_optional(&self, key: &str) -> Option<&ApiCredential> {
        self.credentials.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.credentials.contains_key(key)
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("keys", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}
