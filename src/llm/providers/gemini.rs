use super::{api_key, non_empty, post_json, LlmProvider};
use crate::errors::GenerationError;
use crate::llm::{ChatMessage, Provider};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google's Gemini `generateContent` backend
#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new() -> Result<Self, GenerationError> {
        Ok(Self {
            api_key: api_key(Provider::Gemini.api_key_var())?,
            client: Client::new(),
        })
    }
}

/// Pulls the text out of a `generateContent` response, reporting blocked prompts.
fn extract_text(json_resp: &Value) -> Result<String, GenerationError> {
    if let Some(reason) = json_resp["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::Rejected(format!(
            "Content blocked by API ({})",
            reason
        )));
    }
    let parts = json_resp["candidates"][0]["content"]["parts"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    non_empty("Gemini", Some(text.as_str()))
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn call_llm_api(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, GenerationError> {
        let contents = messages
            .iter()
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect::<Vec<_>>();
        let url = format!("{}/{}:generateContent", MODELS_URL, model);
        let request = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "contents": contents }));
        extract_text(&post_json("Gemini", request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_prompts_are_rejected() {
        let resp = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = extract_text(&resp).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        assert!(!err.is_transient());
    }

    #[test]
    fn text_parts_are_joined() {
        let resp = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "kayaker" }] } }]
        });
        assert_eq!(extract_text(&resp).unwrap(), "Hello kayaker");
    }
}
