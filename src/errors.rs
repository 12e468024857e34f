//! Error taxonomy shared by the actor mesh, the supervisor and the external boundaries.

/// Failures raised by the tool executor. Always surfaced to the calling actor as a
/// structured error result, never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Security error: path '{0}' resolves outside the sandbox root")]
    Sandbox(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Missing parameter '{0}'")]
    MissingParam(&'static str),
    #[error("Tool '{tool}' is not available to role '{role}'")]
    NotPermitted { tool: String, role: String },
    #[error("Search failed: {0}")]
    Search(String),
    #[error("Tool '{tool}' did not answer within {waited:?}")]
    Timeout {
        tool: String,
        waited: std::time::Duration,
    },
}

/// Failures raised by the generation adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("Error: unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("Error: {0} environment variable not set")]
    MissingApiKey(&'static str),
    #[error("Error: transient failure: {0}")]
    Transient(String),
    #[error("Error: request rejected: {0}")]
    Rejected(String),
    #[error("Error: generation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
    #[error("Error: generation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl GenerationError {
    /// Whether the failure is worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

/// Failures local to one actor's current task. Each one ends up as a task failure
/// notification to the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Dependency timeout: waited {waited:?} for {dependency}")]
    DependencyTimeout {
        dependency: String,
        waited: std::time::Duration,
    },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Task assignment error: no actor registered for role '{0}'")]
    TaskAssignment(String),
    #[error("Tool error: {0}")]
    Tool(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("No active task")]
    NoActiveTask,
    #[error("{0}")]
    Internal(String),
}

/// Failures while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid duration '{value}': {source}")]
    Duration {
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("Unsupported config format '{0}' (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Actor(#[from] ActorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Schema error: {0}")]
    Schema(String),
}

impl<'a> From<jsonschema::ValidationError<'a>> for Error {
    fn from(err: jsonschema::ValidationError<'a>) -> Self {
        Error::Schema(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
