use serde::Serialize;

/// One turn of a provider conversation.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// "system", "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Actors send their whole prompt as a single user turn.
    pub fn user_prompt(prompt: &str) -> Vec<ChatMessage> {
        vec![Self::new("user", prompt)]
    }
}
