use super::{api_key, non_empty, post_json, LlmProvider};
use crate::errors::GenerationError;
use crate::llm::{ChatMessage, Provider};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new() -> Result<Self, GenerationError> {
        Ok(Self {
            api_key: api_key(Provider::Anthropic.api_key_var())?,
            client: Client::new(),
        })
    }
}

/// Builds a messages request; system turns move to the top level `system` field.
fn request_body(model: &str, messages: Vec<ChatMessage>) -> Value {
    let (system, turns): (Vec<_>, Vec<_>) =
        messages.into_iter().partition(|msg| msg.role == "system");
    let mut body = json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": turns,
    });
    if !system.is_empty() {
        body["system"] = Value::String(
            system
                .into_iter()
                .map(|m| m.content)
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    body
}

/// Concatenates the text blocks of a messages response.
fn extract_text(resp: &Value) -> Result<String, GenerationError> {
    let text = resp["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"].as_str().unwrap_or("text") == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<String>()
        });
    non_empty("Anthropic", text.as_deref())
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn call_llm_api(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, GenerationError> {
        let request = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", self.api_key.as_str())
            .header("anthropic-version", API_VERSION)
            .json(&request_body(model, messages));
        let text = extract_text(&post_json("Anthropic", request).await?)?;
        debug!("Anthropic response: {} chars", text.len());
        Ok(text)
    }
}
