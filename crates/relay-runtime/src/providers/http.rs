//! HTTP plumbing shared by the provider clients.
//!
//! Every provider sends one JSON request and reads one JSON reply; status
//! classification and body decoding live here so they stay identical
//! across backends.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::ProviderError;

/// Longest error body excerpt carried into an `ApiError`.
const MAX_ERROR_EXCERPT: usize = 200;

/// Send a request and return the response if its status is a success.
pub(crate) async fn send(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<Response, ProviderError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| transport_error(e, timeout))?;

    check_status(response).await
}

/// Send a request whose body is read incrementally.
///
/// `timeout` bounds only connecting and receiving the headers; the body may
/// keep arriving for as long as the server produces it.
#[cfg(feature = "anthropic")]
pub(crate) async fn send_streaming(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<Response, ProviderError> {
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| ProviderError::Timeout(timeout))?
        .map_err(|e| transport_error(e, timeout))?;

    check_status(response).await
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

/// Read the full body and decode it as `T`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(e, timeout))?;
    decode(&body)
}

/// Decode a JSON body; any shape mismatch is a malformed response.
pub(crate) fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

pub(crate) fn transport_error(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::HttpError(error.to_string())
    }
}

async fn status_error(response: Response) -> ProviderError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited {
            retry_after: retry_after(response.headers()),
        };
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ProviderError::AuthError;
    }

    let body = response.text().await.unwrap_or_default();
    ProviderError::ApiError {
        status: status.as_u16(),
        message: error_message(&body),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"error": {"message": ..}}` (Anthropic, OpenAI),
/// `{"error": ".."}` (Ollama) and `{"message": ..}` (vLLM). Anything else is
/// returned as a truncated excerpt.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<JsonValue>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v["error"]["message"]
            .as_str()
            .or_else(|| v["error"].as_str())
            .or_else(|| v["message"].as_str())
    });

    match message {
        Some(message) => message.to_string(),
        None => body.chars().take(MAX_ERROR_EXCERPT).collect(),
    }
}
