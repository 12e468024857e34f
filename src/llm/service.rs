//! Generation adapter: provider selection plus retry with exponential backoff.

use crate::errors::GenerationError;
use crate::llm::providers::anthropic::AnthropicProvider;
use crate::llm::providers::gemini::GeminiProvider;
use crate::llm::providers::openai::OpenAiProvider;
use crate::llm::providers::LlmProvider;
use crate::llm::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Supported text generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// Model used when neither the config nor the caller names one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::Anthropic => "claude-3-7-sonnet-latest",
            Provider::Gemini => "gemini-2.5-pro-preview-03-25",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(GenerationError::UnknownProvider(other.to_string())),
        }
    }
}

/// The single capability actors use to turn a prompt into text.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generates text for `prompt`.
    ///
    /// # Arguments
    /// * `provider` - Backend to use
    /// * `prompt` - Full prompt text
    /// * `model` - Optional model override; the provider default is used otherwise
    ///
    /// # Returns
    /// * `Result<String, GenerationError>` - Generated text, never an error-looking string
    async fn generate(
        &self,
        provider: Provider,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<String, GenerationError>;
}

/// Bounded retry schedule: the delay doubles after every transient failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        self.initial_delay.saturating_mul(2u32.saturating_pow(exp))
    }
}

/// [`GenerationService`] backed by real HTTP providers.
pub struct LlmService {
    providers: HashMap<Provider, Arc<dyn LlmProvider>>,
    policy: RetryPolicy,
}

impl LlmService {
    /// Registers every provider whose API key is present in the environment.
    pub fn from_env(policy: RetryPolicy) -> Self {
        let mut service = Self::empty(policy);
        let candidates: Vec<(Provider, Result<Arc<dyn LlmProvider>, GenerationError>)> = vec![
            (
                Provider::OpenAi,
                OpenAiProvider::new().map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            ),
            (
                Provider::Anthropic,
                AnthropicProvider::new().map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            ),
            (
                Provider::Gemini,
                GeminiProvider::new().map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            ),
        ];
        for (provider, backend) in candidates {
            match backend {
                Ok(backend) => {
                    service.providers.insert(provider, backend);
                }
                Err(e) => debug!("Skipping {}: {}", provider, e),
            }
        }
        info!(
            "Generation providers available: {:?}",
            service.providers.keys().map(|p| p.as_str()).collect::<Vec<_>>()
        );
        service
    }

    pub fn empty(policy: RetryPolicy) -> Self {
        Self {
            providers: HashMap::new(),
            policy,
        }
    }

    /// Registers (or replaces) the backend for `provider`.
    pub fn with_provider(mut self, provider: Provider, backend: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider, backend);
        self
    }

    pub fn has_provider(&self, provider: Provider) -> bool {
        self.providers.contains_key(&provider)
    }
}

#[async_trait]
impl GenerationService for LlmService {
    async fn generate(
        &self,
        provider: Provider,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<String, GenerationError> {
        let backend = self
            .providers
            .get(&provider)
            .ok_or(GenerationError::MissingApiKey(provider.api_key_var()))?;
        let model = model.unwrap_or_else(|| provider.default_model());
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                "Generation attempt {}/{} with {} ({})",
                attempt, max_attempts, provider, model
            );
            let err = match backend
                .call_llm_api(model, ChatMessage::user_prompt(prompt))
                .await
            {
                Ok(text) if text.trim().is_empty() => {
                    GenerationError::Rejected("Empty response from API".to_string())
                }
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            if !err.is_transient() {
                warn!("Generation failed with {}: {}", provider, err);
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!("Generation retries exhausted after {} attempts", attempt);
                return Err(GenerationError::Exhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }
            let delay = self.policy.delay_after(attempt);
            warn!(
                "Transient generation failure ({}), retrying in {:?}",
                err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails transiently `failures` times, then answers.
    #[derive(Debug)]
    struct Flaky {
        failures: usize,
        transient: bool,
        calls: Mutex<Vec<Instant>>,
    }

    impl Flaky {
        fn new(failures: usize, transient: bool) -> Arc<Self> {
            Arc::new(Self {
                failures,
                transient,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Flaky {
        async fn call_llm_api(
            &self,
            _model: &str,
            _messages: Vec<ChatMessage>,
        ) -> Result<String, GenerationError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            if calls.len() <= self.failures {
                if self.transient {
                    Err(GenerationError::Transient("503".into()))
                } else {
                    Err(GenerationError::Rejected("401".into()))
                }
            } else {
                Ok("<p>kayaks</p>".into())
            }
        }
    }

    fn service(backend: Arc<Flaky>) -> LlmService {
        LlmService::empty(RetryPolicy::default()).with_provider(Provider::OpenAi, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let backend = Flaky::new(2, true);
        let text = service(backend.clone())
            .generate(Provider::OpenAi, "hello", None)
            .await
            .unwrap();
        assert_eq!(text, "<p>kayaks</p>");

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert_eq!(first_gap, Duration::from_secs(1));
        assert_eq!(second_gap, Duration::from_secs(2));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let backend = Flaky::new(1, false);
        let err = service(backend.clone())
            .generate(Provider::OpenAi, "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Rejected(_)));
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let backend = Flaky::new(10, true);
        let err = service(backend.clone())
            .generate(Provider::OpenAi, "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Exhausted { attempts: 3, .. }));
        assert!(err.to_string().starts_with("Error:"));
        assert_eq!(backend.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unregistered_provider_reports_missing_key() {
        let err = LlmService::empty(RetryPolicy::default())
            .generate(Provider::Gemini, "hello", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn provider_names_parse() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert!("ollama".parse::<Provider>().is_err());
    }
}
