use crate::errors::GenerationError;
use crate::llm::ChatMessage;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::fmt::Debug;

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// A concrete text generation backend.
#[async_trait]
pub trait LlmProvider: Debug + Send + Sync {
    async fn call_llm_api(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, GenerationError>;
}

/// Reads a provider key, treating a blank value as missing.
pub(crate) fn api_key(var: &'static str) -> Result<String, GenerationError> {
    std::env::var(var)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or(GenerationError::MissingApiKey(var))
}

/// Sends a prepared request and decodes the JSON body of a successful answer.
pub(crate) async fn post_json(
    backend: &str,
    request: RequestBuilder,
) -> Result<Value, GenerationError> {
    let res = request
        .send()
        .await
        .map_err(|e| classify_reqwest(backend, e))?;
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(classify_status(backend, status, &body));
    }
    res.json().await.map_err(|e| classify_reqwest(backend, e))
}

/// Maps a failed HTTP exchange to a transient or permanent error.
pub(crate) fn classify_status(backend: &str, status: StatusCode, body: &str) -> GenerationError {
    let message = format!("{} API error ({}): {}", backend, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        GenerationError::Transient(message)
    } else {
        GenerationError::Rejected(message)
    }
}

/// Network level failures are worth retrying, everything else is not.
pub(crate) fn classify_reqwest(backend: &str, err: reqwest::Error) -> GenerationError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        GenerationError::Transient(format!("{} request failed: {}", backend, err))
    } else {
        GenerationError::Rejected(format!("{} request failed: {}", backend, err))
    }
}

/// Turns an optional text field into the generated text, rejecting empty answers.
pub(crate) fn non_empty(backend: &str, text: Option<&str>) -> Result<String, GenerationError> {
    match text.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(GenerationError::Rejected(format!(
            "{} returned no text",
            backend
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(classify_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(classify_status("OpenAI", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status("OpenAI", StatusCode::UNAUTHORIZED, "bad key").is_transient());
    }

    #[test]
    fn blank_text_is_rejected() {
        assert_eq!(non_empty("Gemini", Some("  hi \n")).unwrap(), "hi");
        assert!(non_empty("Gemini", Some("   ")).is_err());
        assert!(non_empty("Gemini", None).is_err());
    }
}
