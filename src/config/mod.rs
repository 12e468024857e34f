mod parser;
use crate::core::TravelModel;
use crate::errors::ConfigError;
use crate::llm::{Provider, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use parser::load_config;

/// Top level configuration of one simulation run
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SimulationConfig {
    /// Request to run when none is given on the command line
    pub request: Option<String>,
    /// Generation backend settings
    pub llm: LlmConfig,
    /// Tick rates, timeouts and bounds of the actor mesh
    pub runtime: RuntimeConfig,
    /// Travel pacing between named locations
    pub travel: TravelConfig,
    /// Output directory for every written artifact
    pub sandbox: SandboxConfig,
    /// Optional web search endpoint
    pub search: SearchConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Model name; the provider default is used when absent
    pub model: Option<String>,
    pub max_retries: usize,
    #[serde(with = "duration_str")]
    pub initial_delay: Duration,
    /// Upper bound an actor waits for a single generation call
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: None,
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            initial_delay: self.initial_delay,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pause between two decide/act cycles of an actor
    #[serde(with = "duration_str")]
    pub actor_tick: Duration,
    /// Safety tick of the supervisor loop; every tick counts as one iteration
    #[serde(with = "duration_str")]
    pub run_tick: Duration,
    pub max_iterations: u64,
    #[serde(with = "duration_str")]
    pub dependency_timeout: Duration,
    #[serde(with = "duration_str")]
    pub coordinator_dependency_timeout: Duration,
    #[serde(with = "duration_str")]
    pub component_timeout: Duration,
    #[serde(with = "duration_str")]
    pub tool_timeout: Duration,
    #[serde(with = "duration_str")]
    pub review_timeout: Duration,
    #[serde(with = "duration_str")]
    pub user_response_timeout: Duration,
    pub max_fix_rounds: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            actor_tick: Duration::from_millis(100),
            run_tick: Duration::from_millis(500),
            max_iterations: 2000,
            dependency_timeout: Duration::from_secs(120),
            coordinator_dependency_timeout: Duration::from_secs(180),
            component_timeout: Duration::from_secs(180),
            tool_timeout: Duration::from_secs(60),
            review_timeout: Duration::from_secs(600),
            user_response_timeout: Duration::from_secs(300),
            max_fix_rounds: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TravelConfig {
    /// Units per second
    pub speed: f64,
    #[serde(with = "duration_str")]
    pub min_delay: Duration,
    pub time_scale: f64,
}

impl Default for TravelConfig {
    fn default() -> Self {
        let model = TravelModel::default();
        Self {
            speed: model.speed,
            min_delay: model.min_delay,
            time_scale: model.time_scale,
        }
    }
}

impl TravelConfig {
    pub fn model(&self) -> TravelModel {
        TravelModel {
            speed: self.speed,
            min_delay: self.min_delay,
            time_scale: self.time_scale,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub root: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: "output".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SearchConfig {
    /// Endpoint receiving `?q=<query>`; search is disabled when absent
    pub endpoint: Option<String>,
}

/// Human readable durations (`"500ms"`, `"2m"`) in config files.
mod duration_str {
    use super::ConfigError;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(|source| {
            serde::de::Error::custom(ConfigError::Duration { value: raw, source })
        })
    }
}
