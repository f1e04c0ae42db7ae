//! AWS Bedrock provider, calling `InvokeModel` through the AWS SDK.
//!
//! Bedrock hosts several model families behind one API, each with its own
//! request and response body. The family is chosen from the model id:
//! `anthropic.*` models take the Messages body, `meta.*` models take a
//! single Llama 3 chat prompt.
//!
//! Credentials come from `access_key_id` / `secret_access_key` settings (or
//! the matching `AWS_*` variables) when present, and from the SDK's default
//! chain (profiles, SSO, instance metadata) otherwise. SDK-level retries are
//! disabled; the invoker owns retry.

use super::{
    factory::ProviderFactory,
    secrets::{CredentialBuilder, CredentialSet},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_bedrockruntime::config::Credentials;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Environment variable holding the access key id.
pub const AWS_ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";

/// Environment variable holding the secret access key.
pub const AWS_SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Environment variable holding a temporary session token.
pub const AWS_SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

const DEFAULT_REGION: &str = "us-east-1";
const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";

/// Request/response body layout of a Bedrock model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Anthropic Claude: Messages body with `anthropic_version`
    Claude,
    /// Meta Llama: `prompt` / `max_gen_len` body
    Llama,
}

impl ModelFamily {
    /// Detect the family from a model id or inference profile id.
    pub fn from_model_id(model_id: &str) -> Result<Self, ProviderError> {
        if model_id.contains("anthropic.") {
            Ok(ModelFamily::Claude)
        } else if model_id.contains("meta.") {
            Ok(ModelFamily::Llama)
        } else {
            Err(ProviderError::NotConfigured(format!(
                "Unsupported Bedrock model '{}': expected an anthropic.* or meta.* model id",
                model_id
            )))
        }
    }
}

/// AWS Bedrock `InvokeModel` client.
///
/// The SDK client is built on first use, since loading AWS configuration
/// is asynchronous.
pub struct BedrockProvider {
    region: Option<String>,
    endpoint_url: Option<String>,
    credentials: Option<CredentialSet>,
    client: OnceCell<Client>,
}

impl std::fmt::Debug for BedrockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockProvider")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl BedrockProvider {
    /// Create a provider using the SDK's default region and credential chains.
    pub fn new() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            credentials: None,
            client: OnceCell::new(),
        }
    }

    /// Create from JSON configuration.
    ///
    /// Reads `region`, `endpoint_url` and the optional static keys
    /// `access_key_id`, `secret_access_key` and `session_token`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credentials = CredentialBuilder::new()
            .optional("access_key_id", AWS_ACCESS_KEY_ID_ENV, "AWS access key id")
            .optional("secret_access_key", AWS_SECRET_ACCESS_KEY_ENV, "AWS secret access key")
            .optional("session_token", AWS_SESSION_TOKEN_ENV, "AWS session token")
            .build(config)?;

        let credentials = match (
            credentials.has("access_key_id"),
            credentials.has("secret_access_key"),
        ) {
            (true, true) => Some(credentials),
            (false, false) => None,
            _ => {
                return Err(ProviderError::NotConfigured(
                    "AWS access_key_id and secret_access_key must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            region: config["region"].as_str().map(str::to_string),
            endpoint_url: config["endpoint_url"].as_str().map(str::to_string),
            credentials,
            client: OnceCell::new(),
        })
    }

    /// Pin the AWS region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Send requests to a custom endpoint (VPC endpoint, proxy).
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    async fn client(&self) -> Result<&Client, ProviderError> {
        self.client
            .get_or_try_init(|| async {
                let region = RegionProviderChain::first_try(self.region.clone().map(Region::new))
                    .or_default_provider()
                    .or_else(Region::new(DEFAULT_REGION));

                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .retry_config(RetryConfig::disabled());

                if let Some(url) = &self.endpoint_url {
                    loader = loader.endpoint_url(url);
                }
                if let Some(creds) = &self.credentials {
                    // SECURITY: keys are exposed only to hand them to the signer
                    loader = loader.credentials_provider(Credentials::new(
                        creds.get("access_key_id")?.expose(),
                        creds.get("secret_access_key")?.expose(),
                        creds
                            .get_optional("session_token")
                            .map(|token| token.expose().to_string()),
                        None,
                        "relay-settings",
                    ));
                }

                Ok::<_, ProviderError>(Client::new(&loader.load().await))
            })
            .await
    }
}

impl Default for BedrockProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Request and response bodies
// ============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    anthropic_version: &'static str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// `content` is the required result structure.
#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
struct ClaudeBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct LlamaRequest {
    prompt: String,
    max_gen_len: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// `generation_token_count` is present on every finished generation, even
/// when `generation` itself is null.
#[derive(Debug, Deserialize)]
struct LlamaResponse {
    #[serde(default)]
    generation: Option<String>,
    #[serde(default)]
    prompt_token_count: u32,
    generation_token_count: u32,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Render messages with the Llama 3 instruct chat template.
fn llama3_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str(&format!(
            "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
            msg.role, msg.content
        ));
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Serialize the request body for `family`.
fn request_body(
    family: ModelFamily,
    messages: Vec<ChatMessage>,
    config: &CompletionConfig,
) -> Result<Vec<u8>, ProviderError> {
    let temperature = (config.temperature != 0.0).then_some(config.temperature);

    let body = match family {
        ModelFamily::Claude => {
            let (system, messages): (Vec<_>, Vec<_>) =
                messages.into_iter().partition(ChatMessage::is_system);
            serde_json::to_vec(&ClaudeRequest {
                anthropic_version: ANTHROPIC_BEDROCK_VERSION,
                max_tokens: config.max_tokens,
                system: system.into_iter().last().map(|msg| msg.content),
                messages,
                temperature,
            })
        }
        ModelFamily::Llama => serde_json::to_vec(&LlamaRequest {
            prompt: llama3_prompt(&messages),
            max_gen_len: config.max_tokens,
            temperature,
        }),
    };

    body.map_err(|e| ProviderError::NotConfigured(format!("Failed to encode request: {}", e)))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

/// Decode a reply body into the provider-neutral response.
fn parse_response(
    family: ModelFamily,
    body: &[u8],
    model: &str,
) -> Result<CompletionResponse, ProviderError> {
    let (content, usage, stop_reason) = match family {
        ModelFamily::Claude => {
            let body: ClaudeResponse = decode(body)?;
            let content = body
                .content
                .into_iter()
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join("");
            let usage = TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
                ..TokenUsage::default()
            };
            (content, usage, body.stop_reason)
        }
        ModelFamily::Llama => {
            let body: LlamaResponse = decode(body)?;
            let usage = TokenUsage {
                prompt_tokens: body.prompt_token_count,
                completion_tokens: body.generation_token_count,
                ..TokenUsage::default()
            };
            (body.generation.unwrap_or_default(), usage, body.stop_reason)
        }
    };

    Ok(CompletionResponse {
        content,
        usage,
        model: model.to_string(),
        stop_reason,
    })
}

/// Map a Bedrock error code onto the shared error taxonomy.
fn classify(code: Option<&str>, message: &str, status: Option<u16>) -> ProviderError {
    let api_error = |status: u16| ProviderError::ApiError {
        status,
        message: match code {
            Some(code) => format!("{}: {}", code, message),
            None => message.to_string(),
        },
    };

    match code {
        Some("ThrottlingException") => ProviderError::RateLimited { retry_after: None },
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "ExpiredTokenException"
            | "InvalidSignatureException",
        ) => ProviderError::AuthError,
        Some("ServiceUnavailableException" | "ModelNotReadyException") => api_error(503),
        Some("InternalServerException") => api_error(500),
        Some("ModelTimeoutException") => api_error(408),
        _ => api_error(status.unwrap_or(400)),
    }
}

fn sdk_error(error: SdkError<InvokeModelError>, timeout: Duration) -> ProviderError {
    match &error {
        SdkError::TimeoutError(_) => ProviderError::Timeout(timeout),
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ProviderError::HttpError(DisplayErrorContext(&error).to_string())
        }
        SdkError::ConstructionFailure(_) => {
            ProviderError::NotConfigured(DisplayErrorContext(&error).to_string())
        }
        _ => classify(
            error.code(),
            error.message().unwrap_or_default(),
            error.raw_response().map(|raw| raw.status().as_u16()),
        ),
    }
}

#[async_trait]
impl LlmProvider for BedrockProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let family = ModelFamily::from_model_id(&config.model)?;
        let body = request_body(family, messages, config)?;
        let client = self.client().await?;

        tracing::debug!(
            provider = "bedrock",
            model = %config.model,
            family = ?family,
            "Sending InvokeModel request"
        );

        let request = client
            .invoke_model()
            .model_id(&config.model)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send();

        let output = tokio::time::timeout(config.timeout, request)
            .await
            .map_err(|_| ProviderError::Timeout(config.timeout))?
            .map_err(|e| sdk_error(e, config.timeout))?;

        parse_response(family, output.body().as_ref(), &config.model)
    }

    async fn health_check(&self) -> bool {
        // No cheap health endpoint exists; a resolved region means requests can be signed
        match self.client().await {
            Ok(client) => client.config().region().is_some(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "bedrock"
    }
}

/// Factory for AWS Bedrock.
///
/// ## Configuration Format
/// ```json
/// {
///   "region": "us-east-1",                 // Optional, falls back to the AWS region chain
///   "endpoint_url": "https://...",         // Optional, custom endpoint
///   "access_key_id": "AKIA...",            // Optional, falls back to AWS_ACCESS_KEY_ID env
///   "secret_access_key": "...",            // Optional, falls back to AWS_SECRET_ACCESS_KEY env
///   "session_token": "..."                 // Optional, falls back to AWS_SESSION_TOKEN env
/// }
/// ```
pub struct BedrockProviderFactory;

impl ProviderFactory for BedrockProviderFactory {
    fn provider_type(&self) -> &'static str {
        "bedrock"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(BedrockProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if let Some(model) = config["model"].as_str() {
            ModelFamily::from_model_id(model)?;
        }
        if let Some(url) = config["endpoint_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "endpoint_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn default_model(&self) -> &'static str {
        "anthropic.claude-3-sonnet-20240229-v1:0"
    }

    fn description(&self) -> &'static str {
        "AWS Bedrock InvokeModel (Claude and Llama models)"
    }
}
