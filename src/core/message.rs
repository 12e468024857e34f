use crate::actors::ActorSnapshot;
use crate::core::{ActorId, Component, Location, TaskDetails, TaskId, TaskKind, TaskRecord};
use crate::tools::{ToolCall, ToolName, ToolOutcome};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved recipient id for messages handled by the supervisor itself.
pub const SUPERVISOR_ID: &str = "supervisor";

/// A message in flight between two mailboxes.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: ActorId,
    pub recipient: ActorId,
    pub content: Content,
}

impl Envelope {
    pub fn new(sender: impl Into<ActorId>, recipient: impl Into<ActorId>, content: Content) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            content,
        }
    }

    /// Convenience for supervisor-originated control messages.
    pub fn control(recipient: impl Into<ActorId>, content: Content) -> Self {
        Self::new(SUPERVISOR_ID, recipient, content)
    }
}

/// Everything that can travel through a mailbox.
#[derive(Debug, Clone)]
pub enum Content {
    /// A task record assigned to the recipient
    NewTask(TaskRecord),
    /// Answer to an earlier tool request
    ToolResult {
        task_id: TaskId,
        tool: ToolName,
        outcome: ToolOutcome,
    },
    /// The recipient reached the location it was travelling to
    Arrived(Location),
    /// Text typed by the human for a task waiting on user input
    UserResponse { task_id: TaskId, text: String },
    /// Shut the recipient down
    Stop,
    /// Actor-to-actor protocol message
    Peer(PeerMessage),
    /// Actor-to-supervisor request
    Request(SupervisorRequest),
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(String),
    Failed(String),
}

/// One task to create and hand to `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delegation {
    pub target: ActorId,
    pub kind: TaskKind,
    pub description: String,
    pub details: TaskDetails,
    /// Names of inputs the task needs before its actor can proceed
    pub dependencies: Vec<String>,
}

/// Requests addressed to [`SUPERVISOR_ID`].
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorRequest {
    TaskAccepted {
        task_id: TaskId,
    },
    TaskUpdate {
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    Delegate {
        origin_task_id: Option<TaskId>,
        tasks: Vec<Delegation>,
    },
    UseTool {
        task_id: TaskId,
        call: ToolCall,
    },
    BeginTransition {
        from: Location,
        to: Location,
    },
    StateChanged(ActorSnapshot),
    RequestUserInput {
        task_id: TaskId,
        question: String,
    },
    SimulationEnd {
        message: String,
        success: bool,
    },
}

/// Messages exchanged directly between actors.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// A saved artifact another actor is waiting for
    DependencyReady {
        dependency: String,
        path: String,
        project_name: String,
        originating_task_id: Option<TaskId>,
    },
    /// Structural markup forwarded to the style and behavior specialists
    StructureReady {
        coordinator_task_id: TaskId,
        page: String,
        html: String,
    },
    ComponentReady {
        coordinator_task_id: TaskId,
        page: String,
        component: Component,
        code: String,
        is_fix: bool,
    },
    ComponentFailed {
        coordinator_task_id: TaskId,
        page: String,
        component: Component,
        error: String,
    },
    ReviewFeedback {
        coordinator_task_id: TaskId,
        project_name: String,
        code_path: String,
        specifications_path: Option<String>,
        feedback: String,
    },
    ReviewApproved {
        coordinator_task_id: TaskId,
        project_name: String,
        code_path: String,
    },
    FixBoundExhausted {
        project_name: String,
        rounds: u32,
        feedback: String,
    },
    NeedsUserInput {
        task_id: TaskId,
        question: String,
    },
    UserClarification {
        task_id: TaskId,
        text: String,
    },
    ProjectFinished {
        message: String,
        success: bool,
    },
}

/// A dependency a routed message satisfies on the recipient's task record.
#[derive(Debug, Clone)]
pub struct DependencySignal {
    pub name: String,
    pub content: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    /// Restricts the match to tasks spawned by this coordinator task
    pub coordinator_task_id: Option<TaskId>,
}

impl PeerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerMessage::DependencyReady { .. } => "task_dependency_ready",
            PeerMessage::StructureReady { .. } => "structure_ready",
            PeerMessage::ComponentReady { .. } => "component_ready",
            PeerMessage::ComponentFailed { .. } => "component_failed",
            PeerMessage::ReviewFeedback { .. } => "qa_feedback",
            PeerMessage::ReviewApproved { .. } => "qa_approved",
            PeerMessage::FixBoundExhausted { .. } => "fix_bound_exhausted",
            PeerMessage::NeedsUserInput { .. } => "request_user_input",
            PeerMessage::UserClarification { .. } => "user_clarification_response",
            PeerMessage::ProjectFinished { .. } => "simulation_end",
        }
    }

    /// The dependency this message satisfies, if any.
    pub fn dependency_signal(&self) -> Option<DependencySignal> {
        match self {
            PeerMessage::DependencyReady {
                dependency,
                path,
                project_name,
                ..
            } => {
                let mut metadata = BTreeMap::new();
                metadata.insert("project_name".to_string(), Value::from(project_name.clone()));
                Some(DependencySignal {
                    name: dependency.clone(),
                    content: Some(path.clone()),
                    metadata,
                    coordinator_task_id: None,
                })
            }
            PeerMessage::StructureReady {
                coordinator_task_id,
                page,
                html,
            } => {
                let mut metadata = BTreeMap::new();
                metadata.insert("page".to_string(), Value::from(page.clone()));
                Some(DependencySignal {
                    name: "structure".to_string(),
                    content: Some(html.clone()),
                    metadata,
                    coordinator_task_id: Some(coordinator_task_id.clone()),
                })
            }
            _ => None,
        }
    }
}
