use super::{api_key, non_empty, post_json, LlmProvider};
use crate::errors::GenerationError;
use crate::llm::{ChatMessage, Provider};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat completions backend.
#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: String,
    client: Client,
}

impl OpenAiProvider {
    /// Creates the backend from `OPENAI_API_KEY`.
    ///
    /// # Returns
    /// * `Result<Self, GenerationError>` - The backend, or `MissingApiKey` when the key is unset
    pub fn new() -> Result<Self, GenerationError> {
        Ok(Self {
            api_key: api_key(Provider::OpenAi.api_key_var())?,
            client: Client::new(),
        })
    }
}

fn request_body(model: &str, messages: &[ChatMessage]) -> Value {
    json!({
        "model": model,
        "messages": messages,
        "temperature": 0.7
    })
}

fn extract_text(resp: &Value) -> Result<String, GenerationError> {
    if let Some(reason) = resp["error"]["message"].as_str() {
        return Err(GenerationError::Rejected(format!("OpenAI error: {}", reason)));
    }
    non_empty("OpenAI", resp["choices"][0]["message"]["content"].as_str())
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn call_llm_api(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, GenerationError> {
        let request = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request_body(model, &messages));
        extract_text(&post_json("OpenAI", request).await?)
    }
}
