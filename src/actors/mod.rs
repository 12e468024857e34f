//! Role-specialized actors and the generic engine that runs them.
//!
//! Every actor is the same [`Actor`] engine driving a [`RoleBehavior`]. The engine owns the
//! mailbox, the status machine, travel and the outstanding generation/tool call; the behavior
//! owns the typed working memory of the current task and decides what to do next.

mod coordinator;
mod marketer;
mod pipeline;
mod planner;
mod relay;
mod reviewer;
mod runtime;
mod specialist;
mod specifier;

pub use coordinator::*;
pub use marketer::*;
pub use pipeline::*;
pub use planner::*;
pub use relay::*;
pub use reviewer::*;
pub use runtime::*;
pub use specialist::*;
pub use specifier::*;

use crate::core::{ActorId, Component, Location, PeerMessage, SupervisorRequest, TaskId, TaskRecord};
use crate::errors::{ActorError, GenerationError};
use crate::tools::{ToolCall, ToolName, ToolOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

/// The fixed cast of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Relay,
    Planner,
    Marketer,
    Specifier,
    Coordinator,
    HtmlSpecialist,
    CssSpecialist,
    JsSpecialist,
    Reviewer,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::Relay,
        Role::Planner,
        Role::Marketer,
        Role::Specifier,
        Role::Coordinator,
        Role::HtmlSpecialist,
        Role::CssSpecialist,
        Role::JsSpecialist,
        Role::Reviewer,
    ];

    /// Fixed actor id of the role's single instance.
    pub fn actor_id(&self) -> &'static str {
        match self {
            Role::Relay => "relay-01",
            Role::Planner => "planner-01",
            Role::Marketer => "marketer-01",
            Role::Specifier => "specifier-01",
            Role::Coordinator => "coordinator-01",
            Role::HtmlSpecialist => "html-01",
            Role::CssSpecialist => "css-01",
            Role::JsSpecialist => "js-01",
            Role::Reviewer => "reviewer-01",
        }
    }

    /// Where the actor starts and returns to think.
    pub fn home(&self) -> Location {
        match self {
            Role::Relay => Location::RelayStation,
            Role::Planner => Location::PlannerOffice,
            Role::Marketer => Location::MarketerDesk,
            Role::Specifier => Location::SpecifierDesk,
            Role::Coordinator => Location::CoordinatorDesk,
            Role::HtmlSpecialist => Location::HtmlDesk,
            Role::CssSpecialist => Location::CssDesk,
            Role::JsSpecialist => Location::JsDesk,
            Role::Reviewer => Location::ReviewerDesk,
        }
    }

    /// Tools the role may ask the supervisor to run.
    pub fn tools(&self) -> &'static [ToolName] {
        match self {
            Role::Specifier | Role::Coordinator => &[ToolName::FileRead, ToolName::FileWrite],
            Role::Marketer => &[ToolName::Search, ToolName::FileWrite],
            Role::Reviewer => &[ToolName::FileRead],
            _ => &[],
        }
    }

    pub fn for_component(component: Component) -> Role {
        match component {
            Component::Structure => Role::HtmlSpecialist,
            Component::Styles => Role::CssSpecialist,
            Component::Behavior => Role::JsSpecialist,
        }
    }

    /// Parses the role names a decomposition response may use.
    ///
    /// Only the three planning roles are accepted; names are matched case-insensitively
    /// with spaces, dashes and underscores ignored.
    pub fn from_decomposition(name: &str) -> Option<Role> {
        let key: String = name
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "marketer" | "marketing" | "marketinganalyst" => Some(Role::Marketer),
            "productmanager" | "pm" | "product" | "specifier" => Some(Role::Specifier),
            "coder" | "developer" | "engineer" | "coordinator" | "programmer" => {
                Some(Role::Coordinator)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Relay => "relay",
            Role::Planner => "planner",
            Role::Marketer => "marketer",
            Role::Specifier => "specifier",
            Role::Coordinator => "coordinator",
            Role::HtmlSpecialist => "html_specialist",
            Role::CssSpecialist => "css_specialist",
            Role::JsSpecialist => "js_specialist",
            Role::Reviewer => "reviewer",
        };
        f.write_str(s)
    }
}

/// Role to actor id mapping the planner delegates through.
#[derive(Debug, Clone, Default)]
pub struct RoleDirectory {
    ids: BTreeMap<Role, ActorId>,
}

impl RoleDirectory {
    /// Directory of the standard cast, one actor per role.
    pub fn fixed() -> Self {
        Self {
            ids: Role::ALL
                .iter()
                .map(|r| (*r, r.actor_id().to_string()))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role: Role, id: impl Into<ActorId>) {
        self.ids.insert(role, id.into());
    }

    pub fn resolve(&self, role: Role) -> Result<&ActorId, ActorError> {
        self.ids
            .get(&role)
            .ok_or_else(|| ActorError::TaskAssignment(role.to_string()))
    }
}

/// Coarse status of an actor as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    Idle,
    Working,
    Transitioning,
    UsingTool,
    WaitingResponse,
    InMeeting,
    Failed,
}

impl fmt::Display for ActorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActorStatus::Idle => "idle",
            ActorStatus::Working => "working",
            ActorStatus::Transitioning => "transitioning",
            ActorStatus::UsingTool => "using-external-tool",
            ActorStatus::WaitingResponse => "waiting-response",
            ActorStatus::InMeeting => "in-meeting",
            ActorStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of an actor, published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub role: Role,
    pub status: ActorStatus,
    pub current_task_id: Option<TaskId>,
    pub location: Location,
    pub target: Option<Location>,
    pub last_error: Option<String>,
    /// Short description of the last thing the actor did
    pub activity: String,
}

/// What a behavior asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Nothing to do this cycle
    Wait,
    /// Call the generation service with the prompt from [`RoleBehavior::build_prompt`]
    Generate,
    /// Run a tool through the supervisor, travelling to its location first if needed
    UseTool(ToolCall),
    TransitionTo(Location),
    Send { to: ActorId, message: PeerMessage },
    Request(SupervisorRequest),
    Complete(String),
    Fail(String),
}

/// Inputs of one decide step that do not belong to the task.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext {
    pub now: Instant,
    pub location: Location,
}

/// Role-specific half of an actor.
///
/// Hooks return `Err` for anything that should fail the current task; the engine turns the
/// error into a failure notification and keeps running.
pub trait RoleBehavior: Send + 'static {
    /// Typed working memory of one task, dropped when the task ends.
    type Memory: Send + 'static;

    fn role(&self) -> Role;

    /// Creates the working memory for a freshly assigned task.
    fn start_task(&mut self, task: &TaskRecord, now: Instant) -> Result<Self::Memory, ActorError>;

    fn decide(
        &mut self,
        ctx: &DecisionContext,
        task: &TaskRecord,
        memory: &mut Self::Memory,
    ) -> Result<Action, ActorError>;

    fn build_prompt(&self, task: &TaskRecord, memory: &Self::Memory) -> Result<String, ActorError>;

    fn on_generation_result(
        &mut self,
        task: &TaskRecord,
        memory: &mut Self::Memory,
        text: String,
    ) -> Result<(), ActorError>;

    fn on_generation_error(
        &mut self,
        _task: &TaskRecord,
        _memory: &mut Self::Memory,
        err: GenerationError,
    ) -> Result<(), ActorError> {
        Err(err.into())
    }

    fn on_tool_result(
        &mut self,
        _task: &TaskRecord,
        _memory: &mut Self::Memory,
        tool: ToolName,
        _outcome: ToolOutcome,
    ) -> Result<(), ActorError> {
        Err(ActorError::Protocol(format!(
            "{} does not use the {} tool",
            self.role(),
            tool
        )))
    }

    /// Handles a message from another actor. `active` is the current task, if any.
    fn on_peer_message(
        &mut self,
        sender: &str,
        message: PeerMessage,
        active: Option<(&TaskRecord, &mut Self::Memory)>,
    ) -> Result<Vec<Action>, ActorError>;

    /// Handles text typed by the human for `task_id`.
    fn on_user_response(&mut self, _task_id: &str, _text: String) -> Result<Vec<Action>, ActorError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposition_aliases_resolve() {
        assert_eq!(Role::from_decomposition("Marketer"), Some(Role::Marketer));
        assert_eq!(Role::from_decomposition("Product Manager"), Some(Role::Specifier));
        assert_eq!(Role::from_decomposition("product_manager"), Some(Role::Specifier));
        assert_eq!(Role::from_decomposition("PM"), Some(Role::Specifier));
        assert_eq!(Role::from_decomposition("coder"), Some(Role::Coordinator));
        assert_eq!(Role::from_decomposition("Designer"), None);
    }

    #[test]
    fn directory_reports_missing_roles() {
        let mut directory = RoleDirectory::empty();
        directory.register(Role::Marketer, "marketer-01");
        assert_eq!(directory.resolve(Role::Marketer).unwrap(), "marketer-01");
        assert!(matches!(
            directory.resolve(Role::Coordinator),
            Err(ActorError::TaskAssignment(_))
        ));
        assert_eq!(
            RoleDirectory::fixed().resolve(Role::Reviewer).unwrap(),
            "reviewer-01"
        );
    }

    #[test]
    fn only_tool_users_have_tools() {
        assert!(Role::Reviewer.tools().contains(&ToolName::FileRead));
        assert!(!Role::Reviewer.tools().contains(&ToolName::FileWrite));
        assert!(Role::Marketer.tools().contains(&ToolName::Search));
        assert!(Role::HtmlSpecialist.tools().is_empty());
    }
}
