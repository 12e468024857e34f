//! The recurring wait → generate → save → notify sub-protocol, shared by every role that
//! produces one artifact per task.

use super::{Action, DecisionContext, Role, RoleBehavior};
use crate::core::{ActorId, PeerMessage, TaskId, TaskRecord};
use crate::errors::{ActorError, GenerationError};
use crate::tools::{ToolCall, ToolName, ToolOutcome};
use crate::utils::strip_code_fences;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How the upstream input reaches the waiting actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message carries a sandbox path that must be read first
    Path,
    /// The message carries the content itself
    Inline,
}

/// What to do when the input never arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutPolicy {
    /// Carry on with this placeholder as input
    Proceed(String),
    /// Fail the task
    Fail,
}

/// Identifies which producer's output satisfies an input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputKey {
    Project(String),
    Component { coordinator_task_id: TaskId, page: String },
}

impl InputKey {
    /// Key carried by an incoming message, if it delivers a dependency.
    pub fn of_message(message: &PeerMessage) -> Option<(String, InputKey, String)> {
        match message {
            PeerMessage::DependencyReady {
                dependency,
                path,
                project_name,
                ..
            } => Some((
                dependency.clone(),
                InputKey::Project(project_name.clone()),
                path.clone(),
            )),
            PeerMessage::StructureReady {
                coordinator_task_id,
                page,
                html,
            } => Some((
                "structure".to_string(),
                InputKey::Component {
                    coordinator_task_id: coordinator_task_id.clone(),
                    page: page.clone(),
                },
                html.clone(),
            )),
            _ => None,
        }
    }
}

/// The one upstream input a task waits for.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub key: InputKey,
    pub delivery: Delivery,
    pub timeout: Duration,
    pub on_timeout: TimeoutPolicy,
}

/// Named steps of the template.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    AwaitingInput { since: Instant },
    ReadingInput { path: String },
    Researching { query: String },
    Generating,
    Persisting { path: String },
    Notifying,
    Failing { reason: String, notified: bool },
    Done,
}

/// Working memory of one artifact task.
#[derive(Debug, Clone)]
pub struct ArtifactMemory {
    pub stage: Stage,
    pub input_spec: Option<InputSpec>,
    /// Path the input was read from, when delivered by path
    pub input_path: Option<String>,
    pub input: Option<String>,
    pub research: Option<String>,
    pub artifact: Option<String>,
    pub saved_path: Option<String>,
}

impl ArtifactMemory {
    fn new(input_spec: Option<InputSpec>) -> Self {
        Self {
            stage: Stage::Generating,
            input_spec,
            input_path: None,
            input: None,
            research: None,
            artifact: None,
            saved_path: None,
        }
    }
}

/// Role-specific callbacks of the template.
pub trait ArtifactRole: Send + 'static {
    fn role(&self) -> Role;

    /// The input the task must wait for, if any.
    fn input(&self, task: &TaskRecord) -> Option<InputSpec>;

    /// Optional lookup run once before generating.
    fn research_query(&self, _task: &TaskRecord) -> Option<String> {
        None
    }

    fn prompt(&self, task: &TaskRecord, memory: &ArtifactMemory) -> String;

    fn clean(&self, text: &str) -> String {
        strip_code_fences(text)
    }

    /// Where to save the artifact. `None` hands it over inline without saving.
    fn artifact_path(&self, task: &TaskRecord) -> Option<String>;

    /// Message announcing the finished artifact.
    fn notification(&self, task: &TaskRecord, memory: &ArtifactMemory) -> Option<(ActorId, PeerMessage)>;

    /// Message sent before the task fails, so a waiting consumer can move on.
    fn failure_notice(&self, _task: &TaskRecord, _reason: &str) -> Option<(ActorId, PeerMessage)> {
        None
    }

    fn summary(&self, task: &TaskRecord, memory: &ArtifactMemory) -> String;
}

/// Runs an [`ArtifactRole`] as a [`RoleBehavior`].
pub struct Pipeline<R: ArtifactRole> {
    role: R,
    /// Inputs that arrived before (or without) a matching task
    early: HashMap<(String, InputKey), String>,
}

impl<R: ArtifactRole> Pipeline<R> {
    pub fn new(role: R) -> Self {
        Self {
            role,
            early: HashMap::new(),
        }
    }

    pub fn inner(&self) -> &R {
        &self.role
    }

    fn after_input(&self, task: &TaskRecord) -> Stage {
        match self.role.research_query(task) {
            Some(query) => Stage::Researching { query },
            None => Stage::Generating,
        }
    }

    /// Moves the memory past the wait once the input is known.
    fn accept_input(&self, task: &TaskRecord, memory: &mut ArtifactMemory, content: String) {
        let delivery = memory
            .input_spec
            .as_ref()
            .map(|s| s.delivery)
            .unwrap_or(Delivery::Inline);
        match delivery {
            Delivery::Path => {
                memory.input_path = Some(content.clone());
                memory.stage = Stage::ReadingInput { path: content };
            }
            Delivery::Inline => {
                memory.input = Some(content);
                memory.stage = self.after_input(task);
            }
        }
    }
}

impl<R: ArtifactRole> RoleBehavior for Pipeline<R> {
    type Memory = ArtifactMemory;

    fn role(&self) -> Role {
        self.role.role()
    }

    fn start_task(&mut self, task: &TaskRecord, now: Instant) -> Result<ArtifactMemory, ActorError> {
        let spec = self.role.input(task);
        let mut memory = ArtifactMemory::new(spec.clone());
        let Some(spec) = spec else {
            memory.stage = self.after_input(task);
            return Ok(memory);
        };

        let from_record = task
            .dependencies
            .get(&spec.name)
            .filter(|d| d.ready)
            .and_then(|d| d.content.clone());
        let from_early = self.early.remove(&(spec.name.clone(), spec.key.clone()));
        match from_record.or(from_early) {
            Some(content) => {
                debug!("{} input '{}' already available", task.id, spec.name);
                self.accept_input(task, &mut memory, content);
            }
            None => {
                debug!("{} waits for '{}'", task.id, spec.name);
                memory.stage = Stage::AwaitingInput { since: now };
            }
        }
        Ok(memory)
    }

    fn decide(
        &mut self,
        ctx: &DecisionContext,
        task: &TaskRecord,
        memory: &mut ArtifactMemory,
    ) -> Result<Action, ActorError> {
        match memory.stage.clone() {
            Stage::AwaitingInput { since } => {
                let Some(spec) = memory.input_spec.clone() else {
                    memory.stage = self.after_input(task);
                    return Ok(Action::Wait);
                };
                let waited = ctx.now.saturating_duration_since(since);
                if waited < spec.timeout {
                    return Ok(Action::Wait);
                }
                match spec.on_timeout {
                    TimeoutPolicy::Proceed(placeholder) => {
                        warn!(
                            "{}: '{}' not received after {:?}, proceeding without it",
                            task.id, spec.name, waited
                        );
                        memory.input = Some(placeholder);
                        memory.stage = self.after_input(task);
                    }
                    TimeoutPolicy::Fail => {
                        memory.stage = Stage::Failing {
                            reason: ActorError::DependencyTimeout {
                                dependency: spec.name,
                                waited,
                            }
                            .to_string(),
                            notified: false,
                        };
                    }
                }
                Ok(Action::Wait)
            }
            Stage::ReadingInput { path } => Ok(Action::UseTool(ToolCall::FileRead { filename: path })),
            Stage::Researching { query } => Ok(Action::UseTool(ToolCall::Search { query })),
            Stage::Generating => Ok(Action::Generate),
            Stage::Persisting { path } => Ok(Action::UseTool(ToolCall::FileWrite {
                filename: path,
                content: memory.artifact.clone().unwrap_or_default(),
            })),
            Stage::Notifying => {
                memory.stage = Stage::Done;
                Ok(match self.role.notification(task, memory) {
                    Some((to, message)) => Action::Send { to, message },
                    None => Action::Wait,
                })
            }
            Stage::Failing { reason, notified } => {
                if !notified {
                    memory.stage = Stage::Failing {
                        reason: reason.clone(),
                        notified: true,
                    };
                    if let Some((to, message)) = self.role.failure_notice(task, &reason) {
                        return Ok(Action::Send { to, message });
                    }
                }
                Ok(Action::Fail(reason))
            }
            Stage::Done => Ok(Action::Complete(self.role.summary(task, memory))),
        }
    }

    fn build_prompt(&self, task: &TaskRecord, memory: &ArtifactMemory) -> Result<String, ActorError> {
        Ok(self.role.prompt(task, memory))
    }

    fn on_generation_result(
        &mut self,
        task: &TaskRecord,
        memory: &mut ArtifactMemory,
        text: String,
    ) -> Result<(), ActorError> {
        memory.artifact = Some(self.role.clean(&text));
        memory.stage = match self.role.artifact_path(task) {
            Some(path) => Stage::Persisting { path },
            None => Stage::Notifying,
        };
        Ok(())
    }

    fn on_generation_error(
        &mut self,
        _task: &TaskRecord,
        memory: &mut ArtifactMemory,
        err: GenerationError,
    ) -> Result<(), ActorError> {
        memory.stage = Stage::Failing {
            reason: err.to_string(),
            notified: false,
        };
        Ok(())
    }

    fn on_tool_result(
        &mut self,
        task: &TaskRecord,
        memory: &mut ArtifactMemory,
        tool: ToolName,
        outcome: ToolOutcome,
    ) -> Result<(), ActorError> {
        match (memory.stage.clone(), tool) {
            (Stage::ReadingInput { .. }, ToolName::FileRead) => {
                if outcome.is_success() {
                    memory.input = outcome.content.or(Some(outcome.result));
                    memory.stage = self.after_input(task);
                    return Ok(());
                }
                let policy = memory.input_spec.as_ref().map(|s| s.on_timeout.clone());
                match policy {
                    Some(TimeoutPolicy::Proceed(placeholder)) => {
                        warn!("{}: could not read input ({}), proceeding", task.id, outcome.result);
                        memory.input = Some(placeholder);
                        memory.stage = self.after_input(task);
                    }
                    _ => {
                        memory.stage = Stage::Failing {
                            reason: ActorError::Tool(outcome.result).to_string(),
                            notified: false,
                        };
                    }
                }
            }
            (Stage::Researching { .. }, ToolName::Search) => {
                if outcome.is_success() {
                    memory.research = outcome.content.or(Some(outcome.result));
                } else {
                    info!("{}: search unavailable ({}), continuing", task.id, outcome.result);
                }
                memory.stage = Stage::Generating;
            }
            (Stage::Persisting { path }, ToolName::FileWrite) => {
                if outcome.is_success() {
                    memory.saved_path = outcome.filename.or(Some(path));
                    memory.stage = Stage::Notifying;
                } else {
                    memory.stage = Stage::Failing {
                        reason: ActorError::Tool(outcome.result).to_string(),
                        notified: false,
                    };
                }
            }
            (stage, tool) => {
                debug!("{}: unexpected {} result in {:?}", task.id, tool, stage);
            }
        }
        Ok(())
    }

    fn on_peer_message(
        &mut self,
        sender: &str,
        message: PeerMessage,
        active: Option<(&TaskRecord, &mut ArtifactMemory)>,
    ) -> Result<Vec<Action>, ActorError> {
        let Some((name, key, content)) = InputKey::of_message(&message) else {
            debug!("{} ignores {} from {}", self.role.role(), message.type_name(), sender);
            return Ok(Vec::new());
        };

        if let Some((task, memory)) = active {
            let waiting = matches!(memory.stage, Stage::AwaitingInput { .. });
            let wanted = memory
                .input_spec
                .as_ref()
                .is_some_and(|s| s.name == name && s.key == key);
            if waiting && wanted {
                info!("{} received '{}' from {}", task.id, name, sender);
                self.accept_input(task, memory, content);
                return Ok(Vec::new());
            }
        }

        debug!("{} keeps early '{}' from {}", self.role.role(), name, sender);
        self.early.insert((name, key), content);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Location, TaskDetails, TaskKind};

    /// Waits for "report" by path, saves to `out.md`, notifies `next-01`.
    struct Probe {
        policy: TimeoutPolicy,
    }

    impl ArtifactRole for Probe {
        fn role(&self) -> Role {
            Role::Specifier
        }

        fn input(&self, task: &TaskRecord) -> Option<InputSpec> {
            Some(InputSpec {
                name: "report".into(),
                key: InputKey::Project(task.details.project_name.clone()),
                delivery: Delivery::Path,
                timeout: Duration::from_secs(10),
                on_timeout: self.policy.clone(),
            })
        }

        fn prompt(&self, _task: &TaskRecord, memory: &ArtifactMemory) -> String {
            format!("input: {}", memory.input.clone().unwrap_or_default())
        }

        fn artifact_path(&self, _task: &TaskRecord) -> Option<String> {
            Some("proj/out.md".into())
        }

        fn notification(&self, _task: &TaskRecord, memory: &ArtifactMemory) -> Option<(ActorId, PeerMessage)> {
            Some((
                "next-01".into(),
                PeerMessage::DependencyReady {
                    dependency: "out".into(),
                    path: memory.saved_path.clone().unwrap_or_default(),
                    project_name: "proj".into(),
                    originating_task_id: None,
                },
            ))
        }

        fn summary(&self, _task: &TaskRecord, _memory: &ArtifactMemory) -> String {
            "done".into()
        }
    }

    fn task() -> TaskRecord {
        TaskRecord::new(
            TaskKind::DefineSpecifications,
            "specs",
            TaskDetails {
                project_name: "proj".into(),
                ..TaskDetails::default()
            },
            "specifier-01",
        )
    }

    fn ctx(now: Instant) -> DecisionContext {
        DecisionContext {
            now,
            location: Location::SaveZone,
        }
    }

    fn ready(name: &str, project: &str, path: &str) -> PeerMessage {
        PeerMessage::DependencyReady {
            dependency: name.into(),
            path: path.into(),
            project_name: project.into(),
            originating_task_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn walks_through_every_stage() {
        let mut pipeline = Pipeline::new(Probe { policy: TimeoutPolicy::Fail });
        let task = task();
        let now = Instant::now();
        let mut memory = pipeline.start_task(&task, now).unwrap();
        assert_eq!(pipeline.decide(&ctx(now), &task, &mut memory).unwrap(), Action::Wait);

        pipeline
            .on_peer_message("other-01", ready("report", "proj", "proj/report.md"), Some((&task, &mut memory)))
            .unwrap();
        assert_eq!(
            pipeline.decide(&ctx(now), &task, &mut memory).unwrap(),
            Action::UseTool(ToolCall::FileRead {
                filename: "proj/report.md".into()
            })
        );

        let mut read = ToolOutcome::success("market notes");
        read.content = Some("market notes".into());
        pipeline
            .on_tool_result(&task, &mut memory, ToolName::FileRead, read)
            .unwrap();
        assert_eq!(pipeline.decide(&ctx(now), &task, &mut memory).unwrap(), Action::Generate);
        assert_eq!(pipeline.build_prompt(&task, &memory).unwrap(), "input: market notes");

        pipeline
            .on_generation_result(&task, &mut memory, "```md\n# Specs\n```".into())
            .unwrap();
        assert_eq!(
            pipeline.decide(&ctx(now), &task, &mut memory).unwrap(),
            Action::UseTool(ToolCall::FileWrite {
                filename: "proj/out.md".into(),
                content: "# Specs".into()
            })
        );

        let mut written = ToolOutcome::success("File written: proj/out.md");
        written.filename = Some("proj/out.md".into());
        pipeline
            .on_tool_result(&task, &mut memory, ToolName::FileWrite, written)
            .unwrap();
        match pipeline.decide(&ctx(now), &task, &mut memory).unwrap() {
            Action::Send { to, message } => {
                assert_eq!(to, "next-01");
                assert!(matches!(message, PeerMessage::DependencyReady { ref path, .. } if path == "proj/out.md"));
            }
            other => panic!("expected notification, got {:?}", other),
        }
        assert_eq!(
            pipeline.decide(&ctx(now), &task, &mut memory).unwrap(),
            Action::Complete("done".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn early_input_is_kept_for_the_matching_task() {
        let mut pipeline = Pipeline::new(Probe { policy: TimeoutPolicy::Fail });
        pipeline
            .on_peer_message("other-01", ready("report", "other_proj", "x.md"), None)
            .unwrap();
        pipeline
            .on_peer_message("other-01", ready("report", "proj", "proj/report.md"), None)
            .unwrap();

        let task = task();
        let memory = pipeline.start_task(&task, Instant::now()).unwrap();
        assert_eq!(
            memory.stage,
            Stage::ReadingInput {
                path: "proj/report.md".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_policy_decides_between_placeholder_and_failure() {
        let task = task();
        let start = Instant::now();
        let late = start + Duration::from_secs(11);

        let mut lenient = Pipeline::new(Probe {
            policy: TimeoutPolicy::Proceed("nothing yet".into()),
        });
        let mut memory = lenient.start_task(&task, start).unwrap();
        assert_eq!(
            lenient.decide(&ctx(start + Duration::from_secs(9)), &task, &mut memory).unwrap(),
            Action::Wait
        );
        lenient.decide(&ctx(late), &task, &mut memory).unwrap();
        assert_eq!(memory.stage, Stage::Generating);
        assert_eq!(memory.input.as_deref(), Some("nothing yet"));

        let mut strict = Pipeline::new(Probe { policy: TimeoutPolicy::Fail });
        let mut memory = strict.start_task(&task, start).unwrap();
        strict.decide(&ctx(late), &task, &mut memory).unwrap();
        match strict.decide(&ctx(late), &task, &mut memory).unwrap() {
            Action::Fail(reason) => assert!(reason.contains("Dependency timeout")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_fails_the_task() {
        let mut pipeline = Pipeline::new(Probe {
            policy: TimeoutPolicy::Proceed(String::new()),
        });
        let task = task();
        let mut memory = pipeline.start_task(&task, Instant::now()).unwrap();
        memory.stage = Stage::Persisting {
            path: "proj/out.md".into(),
        };
        pipeline
            .on_tool_result(
                &task,
                &mut memory,
                ToolName::FileWrite,
                ToolOutcome::error(&crate::errors::ToolError::Sandbox("../x".into())),
            )
            .unwrap();
        assert!(matches!(
            pipeline.decide(&ctx(Instant::now()), &task, &mut memory).unwrap(),
            Action::Fail(reason) if reason.contains("Security error")
        ));
    }
}
