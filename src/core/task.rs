use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identifier of an actor in the mesh (e.g. `planner-01`).
pub type ActorId = String;

/// Identifier of a task record (`task_` followed by 8 hex characters).
pub type TaskId = String;

/// Generates a fresh task identifier.
pub fn new_task_id() -> TaskId {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("task_{}", &hex[..8])
}

/// Lifecycle status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by the supervisor, not yet accepted by its actor
    Pending,
    /// Accepted by its actor and being worked on
    InProgress,
    /// Blocked on an answer from the human at the external boundary
    WaitingUserInput,
    /// Reserved for observers; dependency waits are tracked in the dependency map
    WaitingDependency,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Legal transitions: `pending → in_progress → {completed|failed}` with an optional
    /// `in_progress ⇄ waiting_user_input` detour.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, WaitingUserInput)
                | (WaitingUserInput, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::WaitingUserInput => "waiting_user_input",
            TaskStatus::WaitingDependency => "waiting_dependency",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "waiting_user_input" => Ok(TaskStatus::WaitingUserInput),
            "waiting_dependency" => Ok(TaskStatus::WaitingDependency),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(()),
        }
    }
}

/// A page-level component produced by one of the specialists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// HTML body markup. Every other component depends on it.
    Structure,
    /// Stylesheet
    Styles,
    /// Client-side script
    Behavior,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Structure, Component::Styles, Component::Behavior];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Structure => "html_structure",
            Component::Styles => "css_styles",
            Component::Behavior => "js_logic",
        }
    }

    /// Placeholder used when a specialist never reports back.
    pub fn placeholder(&self, page: &str) -> String {
        match self {
            Component::Structure => format!(
                "<div><h1>Fallback HTML for {}</h1><p>Component timed out.</p></div>",
                page
            ),
            Component::Styles => format!("/* Fallback CSS for {}: Component timed out */", page),
            Component::Behavior => format!("// Fallback JS for {}: Component timed out.", page),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work carried by a task record, with its typed details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Seed task handed to the relay for an external request
    RelayRequest { request: String },
    /// Planner breaks the request into role tasks
    DecomposeRequest { request: String },
    /// Marketer produces the market report
    DevelopStrategy,
    /// Specifier produces the page specifications
    DefineSpecifications,
    /// Coordinator builds the code bundle
    WriteCode,
    /// Specialist generates one component for one page
    GenerateComponent {
        component: Component,
        page: String,
        coordinator_task_id: TaskId,
        specifications: String,
    },
    /// Specialist regenerates one component from review feedback
    FixComponent {
        component: Component,
        page: String,
        coordinator_task_id: TaskId,
        specifications: String,
        current_code: String,
        structure: Option<String>,
        feedback: String,
    },
    /// Reviewer checks a code artifact against its specification
    ReviewCode {
        code_path: String,
        specifications_path: Option<String>,
        coordinator_task_id: TaskId,
    },
    /// Planner announces the approved project
    NotifyCompletion { approved_path: String },
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::RelayRequest { .. } => "relay_request",
            TaskKind::DecomposeRequest { .. } => "decompose_request",
            TaskKind::DevelopStrategy => "develop_strategy",
            TaskKind::DefineSpecifications => "define_specifications",
            TaskKind::WriteCode => "write_code",
            TaskKind::GenerateComponent { .. } => "generate_component",
            TaskKind::FixComponent { .. } => "fix_component",
            TaskKind::ReviewCode { .. } => "review_code",
            TaskKind::NotifyCompletion { .. } => "notify_completion",
        }
    }
}

/// Details every delegated task carries about its project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub original_request: String,
    pub project_name: String,
    pub originating_task_id: Option<TaskId>,
    /// Free-form extras (page name, clarification text, ...)
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// One named input another actor's output must supply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub ready: bool,
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Unit of work tracked by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub description: String,
    pub details: TaskDetails,
    pub assigned_to: ActorId,
    pub status: TaskStatus,
    pub dependencies: BTreeMap<String, Dependency>,
    pub result: Option<String>,
    pub child_tasks: Vec<TaskId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        kind: TaskKind,
        description: impl Into<String>,
        details: TaskDetails,
        assigned_to: impl Into<ActorId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_task_id(),
            kind,
            description: description.into(),
            details,
            assigned_to: assigned_to.into(),
            status: TaskStatus::Pending,
            dependencies: BTreeMap::new(),
            result: None,
            child_tasks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Declares a dependency that starts not ready.
    pub fn add_dependency(&mut self, name: impl Into<String>) {
        self.dependencies.entry(name.into()).or_default();
    }

    /// Marks a dependency ready. Returns `false` if the dependency is unknown or was
    /// already ready, in which case nothing changes.
    pub fn mark_dependency_ready(
        &mut self,
        name: &str,
        content: Option<String>,
        metadata: BTreeMap<String, Value>,
    ) -> bool {
        match self.dependencies.get_mut(name) {
            Some(dep) if !dep.ready => {
                dep.ready = true;
                dep.content = content;
                dep.metadata = metadata;
                self.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn is_waiting_for_dependencies(&self) -> bool {
        self.dependencies.values().any(|d| !d.ready)
    }

    /// Moves the record to `next` if the transition is legal.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskKind::WriteCode,
            "Write the code",
            TaskDetails::default(),
            "coordinator-01",
        )
    }

    #[test]
    fn task_ids_have_expected_shape() {
        let id = new_task_id();
        assert!(id.starts_with("task_"));
        assert_eq!(id.len(), 13);
        assert!(id[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn only_documented_status_paths_are_reachable() {
        use TaskStatus::*;
        let all = [
            Pending,
            InProgress,
            WaitingUserInput,
            WaitingDependency,
            Completed,
            Failed,
        ];
        let allowed = [
            (Pending, InProgress),
            (InProgress, WaitingUserInput),
            (WaitingUserInput, InProgress),
            (InProgress, Completed),
            (InProgress, Failed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn terminal_records_refuse_further_transitions() {
        let mut task = record();
        assert!(task.transition(TaskStatus::InProgress));
        assert!(task.transition(TaskStatus::WaitingUserInput));
        assert!(task.transition(TaskStatus::InProgress));
        assert!(task.transition(TaskStatus::Completed));
        assert!(!task.transition(TaskStatus::Failed));
        assert!(!task.transition(TaskStatus::InProgress));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn pending_cannot_skip_to_completion() {
        let mut task = record();
        assert!(!task.transition(TaskStatus::Completed));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn dependency_becomes_ready_exactly_once() {
        let mut task = record();
        task.add_dependency("specifications");
        assert!(task.is_waiting_for_dependencies());

        assert!(task.mark_dependency_ready(
            "specifications",
            Some("proj/ProductManager/specs.md".into()),
            BTreeMap::new()
        ));
        assert!(!task.mark_dependency_ready("specifications", Some("other".into()), BTreeMap::new()));
        assert_eq!(
            task.dependencies["specifications"].content.as_deref(),
            Some("proj/ProductManager/specs.md")
        );
        assert!(!task.is_waiting_for_dependencies());
        assert!(!task.mark_dependency_ready("unknown", None, BTreeMap::new()));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["pending", "in_progress", "waiting_user_input", "completed", "failed"] {
            let status: TaskStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
