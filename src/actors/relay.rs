//! Entry point of a run: hands the request to the planner and carries messages between the
//! workflow and the human.

use super::{Action, DecisionContext, Role, RoleBehavior, RoleDirectory};
use crate::core::{
    project_name, Delegation, PeerMessage, SupervisorRequest, TaskDetails, TaskKind, TaskRecord,
};
use crate::errors::ActorError;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RelayStage {
    Delegating,
    Done,
}

#[derive(Debug, Clone)]
pub struct RelayMemory {
    pub stage: RelayStage,
    pub request: String,
    pub project_name: String,
}

pub struct Relay {
    directory: RoleDirectory,
}

impl Relay {
    pub fn new(directory: RoleDirectory) -> Self {
        Self { directory }
    }
}

impl RoleBehavior for Relay {
    type Memory = RelayMemory;

    fn role(&self) -> Role {
        Role::Relay
    }

    fn start_task(&mut self, task: &TaskRecord, _now: Instant) -> Result<RelayMemory, ActorError> {
        let TaskKind::RelayRequest { request } = &task.kind else {
            return Err(ActorError::Protocol(format!(
                "relay cannot handle {} tasks",
                task.kind.name()
            )));
        };
        let project = if task.details.project_name.is_empty() {
            project_name(request)
        } else {
            task.details.project_name.clone()
        };
        Ok(RelayMemory {
            stage: RelayStage::Delegating,
            request: request.clone(),
            project_name: project,
        })
    }

    fn decide(
        &mut self,
        _ctx: &DecisionContext,
        task: &TaskRecord,
        memory: &mut RelayMemory,
    ) -> Result<Action, ActorError> {
        match memory.stage {
            RelayStage::Delegating => {
                let planner = self.directory.resolve(Role::Planner)?.clone();
                info!("relaying request for '{}' to {}", memory.project_name, planner);
                memory.stage = RelayStage::Done;
                Ok(Action::Request(SupervisorRequest::Delegate {
                    origin_task_id: Some(task.id.clone()),
                    tasks: vec![Delegation {
                        target: planner,
                        kind: TaskKind::DecomposeRequest {
                            request: memory.request.clone(),
                        },
                        description: format!("Decompose request: {}", memory.request),
                        details: TaskDetails {
                            original_request: memory.request.clone(),
                            project_name: memory.project_name.clone(),
                            originating_task_id: Some(task.id.clone()),
                            ..TaskDetails::default()
                        },
                        dependencies: Vec::new(),
                    }],
                }))
            }
            RelayStage::Done => Ok(Action::Complete(format!(
                "Request forwarded to the planner as project '{}'",
                memory.project_name
            ))),
        }
    }

    fn build_prompt(&self, _task: &TaskRecord, _memory: &RelayMemory) -> Result<String, ActorError> {
        Err(ActorError::Protocol("relay does not generate content".into()))
    }

    fn on_generation_result(
        &mut self,
        _task: &TaskRecord,
        _memory: &mut RelayMemory,
        _text: String,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    fn on_peer_message(
        &mut self,
        sender: &str,
        message: PeerMessage,
        _active: Option<(&TaskRecord, &mut RelayMemory)>,
    ) -> Result<Vec<Action>, ActorError> {
        match message {
            PeerMessage::NeedsUserInput { task_id, question } => {
                info!("{} needs the user: {}", sender, question);
                Ok(vec![Action::Request(SupervisorRequest::RequestUserInput {
                    task_id,
                    question,
                })])
            }
            PeerMessage::ProjectFinished { message, success } => {
                Ok(vec![Action::Request(SupervisorRequest::SimulationEnd {
                    message,
                    success,
                })])
            }
            other => {
                warn!("relay ignores {} from {}", other.type_name(), sender);
                Ok(Vec::new())
            }
        }
    }

    fn on_user_response(&mut self, task_id: &str, text: String) -> Result<Vec<Action>, ActorError> {
        let planner = self.directory.resolve(Role::Planner)?.clone();
        Ok(vec![Action::Send {
            to: planner,
            message: PeerMessage::UserClarification {
                task_id: task_id.to_string(),
                text,
            },
        }])
    }
}
