//! The planner breaks a request into one task per role and closes the project once the
//! reviewer approves it.

use super::{
    Action, DecisionContext, Role, RoleBehavior, RoleDirectory, MARKETING_DEPENDENCY,
    SPECIFICATIONS_DEPENDENCY,
};
use crate::constants::DECOMPOSITION_INSTRUCTIONS;
use crate::core::{
    Delegation, PeerMessage, SupervisorRequest, TaskDetails, TaskId, TaskKind, TaskRecord,
};
use crate::errors::{ActorError, GenerationError};
use crate::llm::{parse_validated, DECOMPOSITION_SCHEMA};
use crate::utils::{extract_json_block, truncate};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// What the decomposition response asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// One merged description per planning role
    Tasks(BTreeMap<Role, String>),
    Clarification(String),
}

/// Parses a decomposition response.
///
/// Tasks for the same role are merged; entries naming an unknown role are skipped. Returns
/// `None` when the response is unusable and the fallback plan should be used.
pub fn parse_plan(response: &str) -> Option<Plan> {
    let json = extract_json_block(response)?;
    let value = match parse_validated(DECOMPOSITION_SCHEMA, &json) {
        Ok(value) => value,
        Err(e) => {
            warn!("decomposition rejected: {}", e);
            return None;
        }
    };

    if let Some(question) = value.get("clarification").and_then(Value::as_str) {
        if value.get("tasks").is_none() && !question.trim().is_empty() {
            return Some(Plan::Clarification(question.trim().to_string()));
        }
    }

    let mut merged: BTreeMap<Role, String> = BTreeMap::new();
    for entry in value.get("tasks").and_then(Value::as_array).into_iter().flatten() {
        let name = entry.get("role").and_then(Value::as_str).unwrap_or_default();
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        let Some(role) = Role::from_decomposition(name) else {
            warn!("skipping task for unknown role '{}'", name);
            continue;
        };
        if description.is_empty() {
            continue;
        }
        merged
            .entry(role)
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(description);
            })
            .or_insert_with(|| description.to_string());
    }
    if merged.is_empty() {
        None
    } else {
        Some(Plan::Tasks(merged))
    }
}

/// Plan used when the model gives nothing usable.
pub fn fallback_plan(request: &str) -> BTreeMap<Role, String> {
    BTreeMap::from([
        (
            Role::Marketer,
            format!("Perform initial market analysis for: '{}'", request),
        ),
        (
            Role::Specifier,
            format!("Define initial specs for: '{}'", request),
        ),
        (Role::Coordinator, "Prepare initial project setup.".to_string()),
    ])
}

/// Fills in the specifier and coordinator tasks when a decomposition leaves them out.
/// Without both, nothing ever reaches review.
pub fn complete_plan(mut plan: BTreeMap<Role, String>, request: &str) -> BTreeMap<Role, String> {
    for (role, description) in fallback_plan(request) {
        if role != Role::Marketer && !plan.contains_key(&role) {
            warn!("decomposition has no {} task, using the default one", role);
            plan.insert(role, description);
        }
    }
    plan
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerStage {
    Decomposing,
    AskingUser { question: String },
    AwaitingClarification { since: Instant },
    Delegating(Vec<Delegation>),
    Announcing { message: String, success: bool },
    Done(String),
}

#[derive(Debug, Clone)]
pub struct PlannerMemory {
    pub stage: PlannerStage,
    pub request: String,
    pub project_name: String,
    pub clarification_asked: bool,
    pub clarification: Option<String>,
}

pub struct Planner {
    directory: RoleDirectory,
    user_response_timeout: Duration,
    /// Decompose task of the running project, parent of the completion task
    root_task_id: Option<TaskId>,
    request: Option<String>,
}

impl Planner {
    pub fn new(directory: RoleDirectory, user_response_timeout: Duration) -> Self {
        Self {
            directory,
            user_response_timeout,
            root_task_id: None,
            request: None,
        }
    }

    /// Turns a plan into delegations, wiring each task to the inputs it needs.
    fn delegations(
        &self,
        task: &TaskRecord,
        memory: &PlannerMemory,
        plan: &BTreeMap<Role, String>,
    ) -> Result<Vec<Delegation>, ActorError> {
        let details = TaskDetails {
            original_request: memory.request.clone(),
            project_name: memory.project_name.clone(),
            originating_task_id: Some(task.id.clone()),
            ..TaskDetails::default()
        };
        let mut delegations = Vec::with_capacity(plan.len());
        for (role, description) in plan {
            let target = self.directory.resolve(*role)?.clone();
            let (kind, dependencies) = match role {
                Role::Marketer => (TaskKind::DevelopStrategy, Vec::new()),
                Role::Specifier => (
                    TaskKind::DefineSpecifications,
                    if plan.contains_key(&Role::Marketer) {
                        vec![MARKETING_DEPENDENCY.to_string()]
                    } else {
                        Vec::new()
                    },
                ),
                Role::Coordinator => (
                    TaskKind::WriteCode,
                    if plan.contains_key(&Role::Specifier) {
                        vec![SPECIFICATIONS_DEPENDENCY.to_string()]
                    } else {
                        Vec::new()
                    },
                ),
                other => {
                    return Err(ActorError::TaskAssignment(other.to_string()));
                }
            };
            delegations.push(Delegation {
                target,
                kind,
                description: description.clone(),
                details: details.clone(),
                dependencies,
            });
        }
        Ok(delegations)
    }

    fn plan_fallback(&self, task: &TaskRecord, memory: &mut PlannerMemory) -> Result<(), ActorError> {
        warn!("{}: using fallback decomposition", task.id);
        let plan = fallback_plan(&memory.request);
        memory.stage = PlannerStage::Delegating(self.delegations(task, memory, &plan)?);
        Ok(())
    }

    fn relay(&self) -> Result<String, ActorError> {
        Ok(self.directory.resolve(Role::Relay)?.clone())
    }
}

impl RoleBehavior for Planner {
    type Memory = PlannerMemory;

    fn role(&self) -> Role {
        Role::Planner
    }

    fn start_task(&mut self, task: &TaskRecord, _now: Instant) -> Result<PlannerMemory, ActorError> {
        let (request, stage) = match &task.kind {
            TaskKind::DecomposeRequest { request } => {
                self.root_task_id = Some(task.id.clone());
                self.request = Some(request.clone());
                (request.clone(), PlannerStage::Decomposing)
            }
            TaskKind::NotifyCompletion { approved_path } => (
                task.details.original_request.clone(),
                PlannerStage::Announcing {
                    message: format!(
                        "Project '{}' has been successfully completed and approved by QA & CEO. \
                         Approved artifact: {}",
                        task.details.project_name, approved_path
                    ),
                    success: true,
                },
            ),
            other => {
                return Err(ActorError::Protocol(format!(
                    "planner cannot handle {} tasks",
                    other.name()
                )))
            }
        };
        Ok(PlannerMemory {
            stage,
            request,
            project_name: task.details.project_name.clone(),
            clarification_asked: false,
            clarification: None,
        })
    }

    fn decide(
        &mut self,
        ctx: &DecisionContext,
        task: &TaskRecord,
        memory: &mut PlannerMemory,
    ) -> Result<Action, ActorError> {
        match memory.stage.clone() {
            PlannerStage::Decomposing => Ok(Action::Generate),
            PlannerStage::AskingUser { question } => {
                memory.stage = PlannerStage::AwaitingClarification { since: ctx.now };
                Ok(Action::Send {
                    to: self.relay()?,
                    message: PeerMessage::NeedsUserInput {
                        task_id: task.id.clone(),
                        question,
                    },
                })
            }
            PlannerStage::AwaitingClarification { since } => {
                if ctx.now.saturating_duration_since(since) >= self.user_response_timeout {
                    warn!("{}: no clarification within {:?}", task.id, self.user_response_timeout);
                    self.plan_fallback(task, memory)?;
                }
                Ok(Action::Wait)
            }
            PlannerStage::Delegating(tasks) => {
                let roles: Vec<String> = tasks.iter().map(|d| d.target.clone()).collect();
                memory.stage = PlannerStage::Done(format!(
                    "Delegated {} task(s) for project '{}' to {}",
                    tasks.len(),
                    memory.project_name,
                    roles.join(", ")
                ));
                Ok(Action::Request(SupervisorRequest::Delegate {
                    origin_task_id: Some(task.id.clone()),
                    tasks,
                }))
            }
            PlannerStage::Announcing { message, success } => {
                memory.stage = PlannerStage::Done(format!(
                    "Announced end of project '{}'",
                    memory.project_name
                ));
                Ok(Action::Send {
                    to: self.relay()?,
                    message: PeerMessage::ProjectFinished { message, success },
                })
            }
            PlannerStage::Done(summary) => Ok(Action::Complete(summary)),
        }
    }

    fn build_prompt(&self, _task: &TaskRecord, memory: &PlannerMemory) -> Result<String, ActorError> {
        let clarification = match &memory.clarification {
            Some(text) => format!(
                "\nThe user answered your earlier question: \"{}\"\nDo not ask further questions.\n",
                text
            ),
            None => String::new(),
        };
        Ok(format!(
            "You are the planner (CEO) of a small web agency simulation.\n\
             A user has submitted the following request: '{}'\n{}\n{}",
            memory.request, clarification, DECOMPOSITION_INSTRUCTIONS
        ))
    }

    fn on_generation_result(
        &mut self,
        task: &TaskRecord,
        memory: &mut PlannerMemory,
        text: String,
    ) -> Result<(), ActorError> {
        match parse_plan(&text) {
            Some(Plan::Clarification(question)) if !memory.clarification_asked => {
                info!("{}: asking the user '{}'", task.id, question);
                memory.clarification_asked = true;
                memory.stage = PlannerStage::AskingUser { question };
                Ok(())
            }
            Some(Plan::Tasks(plan)) => {
                let plan = complete_plan(plan, &memory.request);
                info!("{}: planned roles {:?}", task.id, plan.keys().collect::<Vec<_>>());
                memory.stage = PlannerStage::Delegating(self.delegations(task, memory, &plan)?);
                Ok(())
            }
            _ => {
                warn!("{}: unusable decomposition: {}", task.id, truncate(&text, 200));
                self.plan_fallback(task, memory)
            }
        }
    }

    fn on_generation_error(
        &mut self,
        task: &TaskRecord,
        memory: &mut PlannerMemory,
        err: GenerationError,
    ) -> Result<(), ActorError> {
        warn!("{}: decomposition failed: {}", task.id, err);
        self.plan_fallback(task, memory)
    }

    fn on_peer_message(
        &mut self,
        sender: &str,
        message: PeerMessage,
        active: Option<(&TaskRecord, &mut PlannerMemory)>,
    ) -> Result<Vec<Action>, ActorError> {
        match message {
            PeerMessage::ReviewApproved {
                project_name,
                code_path,
                ..
            } => {
                info!("{} approved '{}' ({})", sender, project_name, code_path);
                let original_request = self.request.clone().unwrap_or_default();
                let me = self.directory.resolve(Role::Planner)?.clone();
                Ok(vec![Action::Request(SupervisorRequest::Delegate {
                    origin_task_id: self.root_task_id.clone(),
                    tasks: vec![Delegation {
                        target: me,
                        kind: TaskKind::NotifyCompletion {
                            approved_path: code_path,
                        },
                        description: format!("Announce completion of project '{}'", project_name),
                        details: TaskDetails {
                            original_request,
                            project_name,
                            originating_task_id: self.root_task_id.clone(),
                            ..TaskDetails::default()
                        },
                        dependencies: Vec::new(),
                    }],
                })])
            }
            PeerMessage::FixBoundExhausted {
                project_name,
                rounds,
                feedback,
            } => {
                warn!("'{}' still rejected after {} fix rounds", project_name, rounds);
                Ok(vec![Action::Send {
                    to: self.relay()?,
                    message: PeerMessage::ProjectFinished {
                        message: format!(
                            "Project '{}' was not approved after {} fix rounds. Last feedback: {}",
                            project_name, rounds, feedback
                        ),
                        success: false,
                    },
                }])
            }
            PeerMessage::UserClarification { task_id, text } => {
                match active {
                    Some((task, memory))
                        if task.id == task_id
                            && matches!(memory.stage, PlannerStage::AwaitingClarification { .. }) =>
                    {
                        info!("{}: clarification received", task.id);
                        memory.clarification = Some(text);
                        memory.stage = PlannerStage::Decomposing;
                    }
                    _ => warn!("clarification for {} arrived with no matching question", task_id),
                }
                Ok(Vec::new())
            }
            other => {
                warn!("planner ignores {} from {}", other.type_name(), sender);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Location;

    fn decompose_task() -> TaskRecord {
        TaskRecord::new(
            TaskKind::DecomposeRequest {
                request: "Build a 2-page site about kayaking".into(),
            },
            "Decompose",
            TaskDetails {
                original_request: "Build a 2-page site about kayaking".into(),
                project_name: "Build_a_2-page_site_about".into(),
                ..TaskDetails::default()
            },
            "planner-01",
        )
    }

    fn ctx(now: Instant) -> DecisionContext {
        DecisionContext {
            now,
            location: Location::PlannerOffice,
        }
    }

    fn planner() -> Planner {
        Planner::new(RoleDirectory::fixed(), Duration::from_secs(300))
    }

    fn delegated(action: Action) -> Vec<Delegation> {
        match action {
            Action::Request(SupervisorRequest::Delegate { tasks, .. }) => tasks,
            other => panic!("expected delegation, got {:?}", other),
        }
    }

    #[test]
    fn merges_tasks_per_role_and_skips_unknown_roles() {
        let response = r#"Here you go:
```json
{"tasks": [
  {"role": "Marketer", "description": "Study paddlers"},
  {"role": "Designer", "description": "Draw logos"},
  {"role": "Product Manager", "description": "Spec Homepage"},
  {"role": "ProductManager", "description": "Spec About"},
  {"role": "Coder", "description": "Build it"}
]}
```"#;
        let Some(Plan::Tasks(plan)) = parse_plan(response) else {
            panic!("expected tasks");
        };
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[&Role::Specifier], "Spec Homepage\nSpec About");
        assert!(parse_plan("no json here").is_none());
        assert!(parse_plan(r#"{"tasks": []}"#).is_none());
        assert_eq!(
            parse_plan(r#"{"clarification": "Which pages?"}"#),
            Some(Plan::Clarification("Which pages?".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delegations_declare_upstream_dependencies() {
        let mut planner = planner();
        let task = decompose_task();
        let mut memory = planner.start_task(&task, Instant::now()).unwrap();
        assert_eq!(planner.decide(&ctx(Instant::now()), &task, &mut memory).unwrap(), Action::Generate);
        assert!(planner
            .build_prompt(&task, &memory)
            .unwrap()
            .contains("break this request down"));

        planner
            .on_generation_result(
                &task,
                &mut memory,
                r#"{"tasks": [{"role": "ProductManager", "description": "Spec"}, {"role": "Coder", "description": "Code"}]}"#.into(),
            )
            .unwrap();
        let tasks = delegated(planner.decide(&ctx(Instant::now()), &task, &mut memory).unwrap());
        assert_eq!(tasks.len(), 2);
        // no marketer planned, so the specifier does not wait for a report
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[0].target, "specifier-01");
        assert_eq!(tasks[1].dependencies, vec![SPECIFICATIONS_DEPENDENCY.to_string()]);
        assert_eq!(tasks[1].details.originating_task_id.as_deref(), Some(task.id.as_str()));
        assert!(matches!(
            planner.decide(&ctx(Instant::now()), &task, &mut memory).unwrap(),
            Action::Complete(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn marketer_only_plan_still_reaches_the_coordinator() {
        let mut planner = planner();
        let task = decompose_task();
        let mut memory = planner.start_task(&task, Instant::now()).unwrap();
        planner
            .on_generation_result(
                &task,
                &mut memory,
                r#"{"tasks": [{"role": "Marketer", "description": "Study paddlers"}]}"#.into(),
            )
            .unwrap();
        let tasks = delegated(planner.decide(&ctx(Instant::now()), &task, &mut memory).unwrap());
        let targets: Vec<&str> = tasks.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["marketer-01", "specifier-01", "coordinator-01"]);
        assert_eq!(tasks[0].description, "Study paddlers");
        assert_eq!(
            tasks[1].description,
            "Define initial specs for: 'Build a 2-page site about kayaking'"
        );
        assert_eq!(tasks[1].dependencies, vec![MARKETING_DEPENDENCY.to_string()]);
        assert_eq!(tasks[2].kind, TaskKind::WriteCode);
        assert_eq!(tasks[2].dependencies, vec![SPECIFICATIONS_DEPENDENCY.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_failure_uses_fallback_plan() {
        let mut planner = planner();
        let task = decompose_task();
        let mut memory = planner.start_task(&task, Instant::now()).unwrap();
        planner
            .on_generation_error(&task, &mut memory, GenerationError::Rejected("bad key".into()))
            .unwrap();
        let tasks = delegated(planner.decide(&ctx(Instant::now()), &task, &mut memory).unwrap());
        assert_eq!(tasks.len(), 3);
        assert_eq!(
            tasks[0].description,
            "Perform initial market analysis for: 'Build a 2-page site about kayaking'"
        );
        assert_eq!(tasks[1].dependencies, vec![MARKETING_DEPENDENCY.to_string()]);
        assert_eq!(tasks[2].description, "Prepare initial project setup.");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_role_actor_fails_the_decomposition() {
        let mut directory = RoleDirectory::empty();
        directory.register(Role::Relay, "relay-01");
        let mut planner = Planner::new(directory, Duration::from_secs(1));
        let task = decompose_task();
        let mut memory = planner.start_task(&task, Instant::now()).unwrap();
        let err = planner
            .on_generation_result(&task, &mut memory, r#"{"tasks": [{"role": "Coder", "description": "x"}]}"#.into())
            .unwrap_err();
        assert!(matches!(err, ActorError::TaskAssignment(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn clarification_round_trip() {
        let mut planner = planner();
        let task = decompose_task();
        let start = Instant::now();
        let mut memory = planner.start_task(&task, start).unwrap();
        planner
            .on_generation_result(&task, &mut memory, r#"{"clarification": "Which colors?"}"#.into())
            .unwrap();
        assert_eq!(
            planner.decide(&ctx(start), &task, &mut memory).unwrap(),
            Action::Send {
                to: "relay-01".into(),
                message: PeerMessage::NeedsUserInput {
                    task_id: task.id.clone(),
                    question: "Which colors?".into()
                }
            }
        );
        assert_eq!(planner.decide(&ctx(start), &task, &mut memory).unwrap(), Action::Wait);

        planner
            .on_peer_message(
                "relay-01",
                PeerMessage::UserClarification {
                    task_id: task.id.clone(),
                    text: "Ocean blue".into(),
                },
                Some((&task, &mut memory)),
            )
            .unwrap();
        assert_eq!(memory.stage, PlannerStage::Decomposing);
        assert!(planner.build_prompt(&task, &memory).unwrap().contains("Ocean blue"));

        // a second question is not asked again
        planner
            .on_generation_result(&task, &mut memory, r#"{"clarification": "And fonts?"}"#.into())
            .unwrap();
        assert!(matches!(memory.stage, PlannerStage::Delegating(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_question_falls_back() {
        let mut planner = planner();
        let task = decompose_task();
        let start = Instant::now();
        let mut memory = planner.start_task(&task, start).unwrap();
        memory.stage = PlannerStage::AwaitingClarification { since: start };
        planner
            .decide(&ctx(start + Duration::from_secs(301)), &task, &mut memory)
            .unwrap();
        assert!(matches!(memory.stage, PlannerStage::Delegating(ref t) if t.len() == 3));
    }

    #[tokio::test(start_paused = true)]
    async fn approval_and_exhaustion_end_the_project() {
        let mut planner = planner();
        let task = decompose_task();
        planner.start_task(&task, Instant::now()).unwrap();

        let actions = planner
            .on_peer_message(
                "reviewer-01",
                PeerMessage::ReviewApproved {
                    coordinator_task_id: "task_c".into(),
                    project_name: "Build_a_2-page_site_about".into(),
                    code_path: "Build_a_2-page_site_about/Coder/index.html".into(),
                },
                None,
            )
            .unwrap();
        let tasks = delegated(actions.into_iter().next().unwrap());
        assert_eq!(tasks[0].target, "planner-01");

        let notify = TaskRecord::new(
            tasks[0].kind.clone(),
            tasks[0].description.clone(),
            tasks[0].details.clone(),
            "planner-01",
        );
        let mut memory = planner.start_task(&notify, Instant::now()).unwrap();
        match planner.decide(&ctx(Instant::now()), &notify, &mut memory).unwrap() {
            Action::Send {
                message: PeerMessage::ProjectFinished { message, success },
                ..
            } => {
                assert!(success);
                assert_eq!(
                    message,
                    "Project 'Build_a_2-page_site_about' has been successfully completed and approved \
                     by QA & CEO. Approved artifact: Build_a_2-page_site_about/Coder/index.html"
                );
            }
            other => panic!("expected completion notice, got {:?}", other),
        }

        let actions = planner
            .on_peer_message(
                "coordinator-01",
                PeerMessage::FixBoundExhausted {
                    project_name: "kayak".into(),
                    rounds: 3,
                    feedback: "still broken".into(),
                },
                None,
            )
            .unwrap();
        assert!(matches!(
            &actions[..],
            [Action::Send { message: PeerMessage::ProjectFinished { success: false, .. }, .. }]
        ));
    }
}
