//! Side-effect boundary used by actors: sandboxed file access and web search.
//!
//! Actors never touch the filesystem or the network themselves. They ask the supervisor,
//! which runs the call through a [`ToolExecutor`] and mails back a [`ToolOutcome`].

mod sandbox;
mod search;

pub use sandbox::*;
pub use search::*;

use crate::actors::Role;
use crate::core::Location;
use crate::errors::ToolError;
use crate::utils::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Names of the tools the executor knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolName {
    FileWrite,
    FileRead,
    Search,
}

impl ToolName {
    /// Where an actor must stand to use the tool.
    pub fn location(&self) -> Location {
        match self {
            ToolName::FileWrite | ToolName::FileRead => Location::SaveZone,
            ToolName::Search => Location::InternetZone,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolName::FileWrite => "file-write",
            ToolName::FileRead => "file-read",
            ToolName::Search => "search",
        })
    }
}

/// A tool invocation with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "kebab-case")]
pub enum ToolCall {
    FileWrite { filename: String, content: String },
    FileRead { filename: String },
    Search { query: String },
}

impl ToolCall {
    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::FileWrite { .. } => ToolName::FileWrite,
            ToolCall::FileRead { .. } => ToolName::FileRead,
            ToolCall::Search { .. } => ToolName::Search,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Result of a tool call as seen by the calling actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub result: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ToolOutcome {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            result: result.into(),
            filename: None,
            content: None,
        }
    }

    pub fn error(err: &ToolError) -> Self {
        Self {
            status: ToolStatus::Error,
            result: err.to_string(),
            filename: None,
            content: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// A single side-effecting capability.
#[async_trait]
pub trait Tool: fmt::Debug + Send + Sync {
    fn name(&self) -> ToolName;
    async fn run(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError>;
}

#[derive(Debug)]
pub struct FileWriteTool {
    sandbox: Sandbox,
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> ToolName {
        ToolName::FileWrite
    }

    async fn run(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let ToolCall::FileWrite { filename, content } = call else {
            return Err(ToolError::MissingParam("filename"));
        };
        let relative = self.sandbox.write(filename, content).await?;
        Ok(ToolOutcome {
            filename: Some(relative.clone()),
            ..ToolOutcome::success(format!("File written: {}", relative))
        })
    }
}

#[derive(Debug)]
pub struct FileReadTool {
    sandbox: Sandbox,
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> ToolName {
        ToolName::FileRead
    }

    async fn run(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let ToolCall::FileRead { filename } = call else {
            return Err(ToolError::MissingParam("filename"));
        };
        let (content, relative) = self.sandbox.read(filename).await?;
        Ok(ToolOutcome {
            filename: Some(relative.clone()),
            content: Some(content.clone()),
            ..ToolOutcome::success(content)
        })
    }
}

#[derive(Debug)]
pub struct SearchTool {
    client: SearchClient,
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> ToolName {
        ToolName::Search
    }

    async fn run(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let ToolCall::Search { query } = call else {
            return Err(ToolError::MissingParam("query"));
        };
        let body = self.client.search(query).await?;
        Ok(ToolOutcome {
            content: Some(body.clone()),
            ..ToolOutcome::success(body)
        })
    }
}

/// Runs tool calls on behalf of actors. Holds no actor state.
#[derive(Debug)]
pub struct ToolExecutor {
    tools: Vec<Box<dyn Tool>>,
    sandbox: Sandbox,
}

impl ToolExecutor {
    /// Builds the executor with the file tools rooted at `sandbox` and the search tool.
    pub fn new(sandbox: Sandbox, search: SearchClient) -> Self {
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(FileWriteTool {
                sandbox: sandbox.clone(),
            }),
            Box::new(FileReadTool {
                sandbox: sandbox.clone(),
            }),
            Box::new(SearchTool { client: search }),
        ];
        Self { tools, sandbox }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Executes `call` for `actor_id`.
    ///
    /// # Arguments
    /// * `actor_id` - Calling actor, for logging
    /// * `role` - Calling actor's role, checked against the tool permissions
    /// * `call` - Tool and parameters
    ///
    /// # Returns
    /// * `ToolOutcome` - `success` with the result, or `error` with the reason
    pub async fn execute(&self, actor_id: &str, role: Role, call: &ToolCall) -> ToolOutcome {
        let name = call.name();
        if !role.tools().contains(&name) {
            let err = ToolError::NotPermitted {
                tool: name.to_string(),
                role: role.to_string(),
            };
            warn!("{}: {}", actor_id, err);
            return ToolOutcome::error(&err);
        }

        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return ToolOutcome::error(&ToolError::MissingParam("tool"));
        };

        match tool.run(call).await {
            Ok(outcome) => {
                info!("{} used {}: {}", actor_id, name, truncate(&outcome.result, 80));
                outcome
            }
            Err(err) => {
                warn!("{} failed to use {}: {}", actor_id, name, err);
                ToolOutcome::error(&err)
            }
        }
    }
}
