//! OpenAI-compatible chat completion providers.
//!
//! One client covers every gateway that speaks the `chat/completions` wire
//! format; they differ only in URL layout and authentication header:
//!
//! | Provider       | URL                                                          | Auth                     |
//! |----------------|--------------------------------------------------------------|--------------------------|
//! | `openai`       | `{base}/chat/completions`                                    | `Authorization: Bearer`  |
//! | `together`     | `{base}/chat/completions`                                    | `Authorization: Bearer`  |
//! | `azure-openai` | `{endpoint}/openai/deployments/{deployment}/chat/completions` | `api-key`                |

use super::{
    factory::{validate_base_url, ProviderFactory},
    http,
    secrets::{ApiCredential, CredentialBuilder, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable name for the Together AI API key.
pub const TOGETHER_API_KEY_ENV: &str = "TOGETHER_API_KEY";

/// Environment variable name for the Azure OpenAI API key.
pub const AZURE_OPENAI_API_KEY_ENV: &str = "AZURE_OPENAI_API_KEY";

/// Environment variable name for the Azure OpenAI resource endpoint.
pub const AZURE_OPENAI_ENDPOINT_ENV: &str = "AZURE_OPENAI_ENDPOINT";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
const AZURE_API_VERSION: &str = "2024-02-15-preview";

/// How the credential is attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiAuth {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure)
    ApiKeyHeader,
}

#[derive(Debug, Clone)]
enum Endpoint {
    Standard {
        base_url: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiProvider {
    name: &'static str,
    credential: ApiCredential,
    auth: OpenAiAuth,
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("credential", &self.credential)
            .field("auth", &self.auth)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl OpenAiProvider {
    /// Create a provider for the public OpenAI API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::standard(
            "openai",
            ApiCredential::new(api_key, CredentialSource::Programmatic, "OpenAI API key"),
            OPENAI_BASE_URL,
        )
    }

    /// Create a provider for Together AI.
    pub fn together(api_key: impl Into<String>) -> Self {
        Self::standard(
            "together",
            ApiCredential::new(api_key, CredentialSource::Programmatic, "Together API key"),
            TOGETHER_BASE_URL,
        )
    }

    /// Create a provider for an Azure OpenAI deployment.
    pub fn azure(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: "azure-openai",
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "Azure OpenAI API key",
            ),
            auth: OpenAiAuth::ApiKeyHeader,
            endpoint: Endpoint::Azure {
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                deployment: deployment.into(),
                api_version: AZURE_API_VERSION.to_string(),
            },
            client: reqwest::Client::new(),
        }
    }

    fn standard(name: &'static str, credential: ApiCredential, base_url: &str) -> Self {
        Self {
            name,
            credential,
            auth: OpenAiAuth::Bearer,
            endpoint: Endpoint::Standard {
                base_url: base_url.to_string(),
            },
            client: reqwest::Client::new(),
        }
    }

    /// Point a standard provider at another OpenAI-compatible base URL.
    ///
    /// Has no effect on Azure deployments, whose URL comes from the resource
    /// endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        if let Endpoint::Standard { base_url } = &mut self.endpoint {
            *base_url = url.into().trim_end_matches('/').to_string();
        }
        self
    }

    /// Override the Azure `api-version` query parameter.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        if let Endpoint::Azure { api_version, .. } = &mut self.endpoint {
            *api_version = version.into();
        }
        self
    }

    /// Use a caller-supplied HTTP client (shared connection pool).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn chat_url(&self) -> String {
        match &self.endpoint {
            Endpoint::Standard { base_url } => format!("{}/chat/completions", base_url),
            Endpoint::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, deployment, api_version
            ),
        }
    }

    fn build_request(&self, messages: Vec<ChatMessage>, config: &CompletionConfig) -> ChatRequest {
        ChatRequest {
            // Azure routes by deployment, the model field is ignored there
            model: match self.endpoint {
                Endpoint::Standard { .. } => Some(config.model.clone()),
                Endpoint::Azure { .. } => None,
            },
            messages,
            max_tokens: config.max_tokens,
            temperature: (config.temperature != 0.0).then_some(config.temperature),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// `choices` is the required result structure.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            ..TokenUsage::default()
        }
    }
}

fn into_completion(
    body: ChatResponse,
    requested_model: &str,
) -> Result<CompletionResponse, ProviderError> {
    let choice = body.choices.into_iter().next().ok_or_else(|| {
        ProviderError::MalformedResponse("response contained no choices".to_string())
    })?;

    Ok(CompletionResponse {
        content: choice
            .message
            .and_then(|message| message.content)
            .unwrap_or_default(),
        usage: body.usage.map(TokenUsage::from).unwrap_or_default(),
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        stop_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = self.build_request(messages, config);

        tracing::debug!(
            provider = self.name,
            model = %config.model,
            "Sending chat completion request"
        );

        // SECURITY: Only expose the credential here, at the point of use
        let builder = self.client.post(self.chat_url()).json(&request);
        let builder = match self.auth {
            OpenAiAuth::Bearer => builder.bearer_auth(self.credential.expose()),
            OpenAiAuth::ApiKeyHeader => builder.header("api-key", self.credential.expose()),
        };

        let response = http::send(builder, config.timeout).await?;
        let body: ChatResponse = http::read_json(response, config.timeout).await?;

        into_completion(body, &config.model)
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Factory for the public OpenAI API.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-...",          // Optional, falls back to OPENAI_API_KEY env
///   "base_url": "https://..."     // Optional, any OpenAI-compatible endpoint
/// }
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )?;
        let provider = OpenAiProvider::standard("openai", credential, OPENAI_BASE_URL);

        Ok(Arc::new(match config["base_url"].as_str() {
            Some(url) => provider.with_base_url(url),
            None => provider,
        }))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", OPENAI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in config or {} env",
                OPENAI_API_KEY_ENV
            )));
        }
        validate_base_url(config)
    }

    fn default_model(&self) -> &'static str {
        "gpt-4o-mini"
    }

    fn description(&self) -> &'static str {
        "OpenAI chat completions"
    }
}

/// Factory for Together AI.
pub struct TogetherProviderFactory;

impl ProviderFactory for TogetherProviderFactory {
    fn provider_type(&self) -> &'static str {
        "together"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            TOGETHER_API_KEY_ENV,
            "Together API key",
        )?;
        let provider = OpenAiProvider::standard("together", credential, TOGETHER_BASE_URL);

        Ok(Arc::new(match config["base_url"].as_str() {
            Some(url) => provider.with_base_url(url),
            None => provider,
        }))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", TOGETHER_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Together API key required: set 'api_key' in config or {} env",
                TOGETHER_API_KEY_ENV
            )));
        }
        validate_base_url(config)
    }

    fn default_model(&self) -> &'static str {
        "mistralai/Mixtral-8x7B-Instruct-v0.1"
    }

    fn description(&self) -> &'static str {
        "Together AI hosted open-weight models (OpenAI-compatible)"
    }
}

/// Factory for Azure OpenAI deployments.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "...",                          // or AZURE_OPENAI_API_KEY env
///   "endpoint": "https://res.openai.azure.com", // or AZURE_OPENAI_ENDPOINT env
///   "deployment": "gpt-4",                     // Optional, defaults to "model"
///   "api_version": "2024-02-15-preview"        // Optional
/// }
/// ```
pub struct AzureOpenAiProviderFactory;

impl ProviderFactory for AzureOpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "azure-openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let creds = CredentialBuilder::new()
            .require("api_key", AZURE_OPENAI_API_KEY_ENV, "Azure OpenAI API key")
            .require("endpoint", AZURE_OPENAI_ENDPOINT_ENV, "Azure OpenAI endpoint")
            .build(config)?;

        let deployment = config["deployment"]
            .as_str()
            .or_else(|| config["model"].as_str())
            .ok_or_else(|| {
                ProviderError::NotConfigured(
                    "Azure OpenAI requires 'deployment' (or 'model') in config".to_string(),
                )
            })?;

        let provider = OpenAiProvider::azure(
            creds.get("endpoint")?.expose(),
            deployment,
            creds.get("api_key")?.expose(),
        );
        let provider = match config["api_version"].as_str() {
            Some(version) => provider.with_api_version(version),
            None => provider,
        };

        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        for (key, env) in [
            ("api_key", AZURE_OPENAI_API_KEY_ENV),
            ("endpoint", AZURE_OPENAI_ENDPOINT_ENV),
        ] {
            if !ApiCredential::is_available(config, key, env) {
                return Err(ProviderError::NotConfigured(format!(
                    "Azure OpenAI '{}' required: set it in config or {} env",
                    key, env
                )));
            }
        }
        if config["deployment"].as_str().is_none() && config["model"].as_str().is_none() {
            return Err(ProviderError::NotConfigured(
                "Azure OpenAI requires 'deployment' (or 'model') in config".to_string(),
            ));
        }
        Ok(())
    }

    fn default_model(&self) -> &'static str {
        "gpt-4"
    }

    fn description(&self) -> &'static str {
        "Azure OpenAI deployment (api-key header auth)"
    }
}
