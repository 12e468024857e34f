//! QA review of the assembled main page.

use super::{Action, DecisionContext, Role, RoleBehavior, RoleDirectory, SCRIPT, STYLESHEET};
use crate::constants::{INCOMPLETE_MARKERS, NO_SPECIFICATIONS, REVIEW_CHECKLIST, VERDICT_FORMAT};
use crate::core::{ActorId, PeerMessage, TaskId, TaskKind, TaskRecord};
use crate::errors::{ActorError, GenerationError};
use crate::llm::{parse_validated, REVIEW_VERDICT_SCHEMA};
use crate::tools::{ToolCall, ToolName, ToolOutcome};
use crate::utils::{extract_json_block, truncate};
use serde::Deserialize;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Decision of one review.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    pub requires_fix: bool,
    pub feedback: String,
}

/// Reads the verdict out of a review response.
///
/// An unparseable response counts as a rejection, and feedback that describes the code as
/// incomplete or truncated forces a fix whatever the flag says.
pub fn parse_verdict(response: &str) -> Verdict {
    let parsed = extract_json_block(response)
        .ok_or_else(|| "no JSON object in the review".to_string())
        .and_then(|json| parse_validated(REVIEW_VERDICT_SCHEMA, &json).map_err(|e| e.to_string()))
        .and_then(|value| serde_json::from_value::<Verdict>(value).map_err(|e| e.to_string()));

    let mut verdict = match parsed {
        Ok(verdict) => verdict,
        Err(reason) => {
            warn!("unusable review verdict ({}): {}", reason, truncate(response, 200));
            return Verdict {
                requires_fix: true,
                feedback: format!(
                    "The review response could not be understood; re-check the code against the \
                     specifications. Raw review: {}",
                    truncate(response, 500)
                ),
            };
        }
    };

    if !verdict.requires_fix {
        let lower = verdict.feedback.to_lowercase();
        if let Some(marker) = INCOMPLETE_MARKERS.iter().find(|m| lower.contains(*m)) {
            info!("approval overridden, feedback mentions '{}'", marker);
            verdict.requires_fix = true;
        }
    }
    verdict
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadTarget {
    Code,
    Asset(&'static str),
    Specifications,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewerStage {
    Reading,
    Judging,
    Reporting,
    Done(String),
}

#[derive(Debug, Clone)]
pub struct ReviewerMemory {
    pub stage: ReviewerStage,
    pub code_path: String,
    pub coordinator_task_id: TaskId,
    pub reads: VecDeque<(ReadTarget, String)>,
    pub code: Option<String>,
    pub assets: Vec<(&'static str, String)>,
    pub specifications: Option<String>,
    pub reports: VecDeque<(ActorId, PeerMessage)>,
}

pub struct Reviewer {
    directory: RoleDirectory,
}

impl Reviewer {
    pub fn new(directory: RoleDirectory) -> Self {
        Self { directory }
    }

    /// Queues the messages announcing `verdict`.
    fn report(
        &self,
        task: &TaskRecord,
        memory: &mut ReviewerMemory,
        verdict: Verdict,
    ) -> Result<(), ActorError> {
        let coordinator = self.directory.resolve(Role::Coordinator)?.clone();
        let project_name = task.details.project_name.clone();
        if verdict.requires_fix {
            info!(
                "{}: {} needs fixes: {}",
                task.id,
                memory.code_path,
                truncate(&verdict.feedback, 120)
            );
            let specifications_path = match &task.kind {
                TaskKind::ReviewCode {
                    specifications_path, ..
                } => specifications_path.clone(),
                _ => None,
            };
            memory.reports.push_back((
                coordinator,
                PeerMessage::ReviewFeedback {
                    coordinator_task_id: memory.coordinator_task_id.clone(),
                    project_name,
                    code_path: memory.code_path.clone(),
                    specifications_path,
                    feedback: verdict.feedback.clone(),
                },
            ));
            memory.stage = ReviewerStage::Reporting;
            return Ok(());
        }

        info!("{}: {} approved", task.id, memory.code_path);
        let approval = PeerMessage::ReviewApproved {
            coordinator_task_id: memory.coordinator_task_id.clone(),
            project_name,
            code_path: memory.code_path.clone(),
        };
        let planner = self.directory.resolve(Role::Planner)?.clone();
        memory.reports.push_back((planner, approval.clone()));
        memory.reports.push_back((coordinator, approval));
        memory.stage = ReviewerStage::Reporting;
        Ok(())
    }
}

impl RoleBehavior for Reviewer {
    type Memory = ReviewerMemory;

    fn role(&self) -> Role {
        Role::Reviewer
    }

    fn start_task(&mut self, task: &TaskRecord, _now: Instant) -> Result<ReviewerMemory, ActorError> {
        let TaskKind::ReviewCode {
            code_path,
            specifications_path,
            coordinator_task_id,
        } = &task.kind
        else {
            return Err(ActorError::Protocol(format!(
                "reviewer cannot handle {} tasks",
                task.kind.name()
            )));
        };

        let mut reads = VecDeque::from([(ReadTarget::Code, code_path.clone())]);
        if let Some((dir, _)) = code_path.rsplit_once('/') {
            for asset in [STYLESHEET, SCRIPT] {
                reads.push_back((ReadTarget::Asset(asset), format!("{}/{}", dir, asset)));
            }
        }
        if let Some(path) = specifications_path {
            reads.push_back((ReadTarget::Specifications, path.clone()));
        }

        Ok(ReviewerMemory {
            stage: ReviewerStage::Reading,
            code_path: code_path.clone(),
            coordinator_task_id: coordinator_task_id.clone(),
            reads,
            code: None,
            assets: Vec::new(),
            specifications: None,
            reports: VecDeque::new(),
        })
    }

    fn decide(
        &mut self,
        _ctx: &DecisionContext,
        task: &TaskRecord,
        memory: &mut ReviewerMemory,
    ) -> Result<Action, ActorError> {
        match memory.stage.clone() {
            ReviewerStage::Reading => match memory.reads.front() {
                Some((_, path)) => Ok(Action::UseTool(ToolCall::FileRead {
                    filename: path.clone(),
                })),
                None => {
                    memory.stage = ReviewerStage::Judging;
                    Ok(Action::Wait)
                }
            },
            ReviewerStage::Judging => Ok(Action::Generate),
            ReviewerStage::Reporting => match memory.reports.pop_front() {
                Some((to, message)) => Ok(Action::Send { to, message }),
                None => {
                    memory.stage = ReviewerStage::Done(format!("Reviewed {}", memory.code_path));
                    Ok(Action::Wait)
                }
            },
            ReviewerStage::Done(summary) => {
                debug!("{}: review finished", task.id);
                Ok(Action::Complete(summary))
            }
        }
    }

    fn build_prompt(&self, task: &TaskRecord, memory: &ReviewerMemory) -> Result<String, ActorError> {
        let code = memory.code.as_deref().ok_or_else(|| {
            ActorError::Internal("review prompt requested before the code was read".into())
        })?;
        let assets: String = memory
            .assets
            .iter()
            .map(|(name, content)| format!("\n--- {} ---\n{}\n--- END {} ---\n", name, content, name))
            .collect();
        Ok(format!(
            "You are a QA Engineer reviewing the website for project '{}'.\n\
             Original request: \"{}\"\n\n\
             --- SPECIFICATIONS ---\n{}\n--- END SPECIFICATIONS ---\n\n\
             --- CODE ({}) ---\n{}\n--- END CODE ---\n{}\n{}\n\n{}",
            task.details.project_name,
            task.details.original_request,
            memory.specifications.as_deref().unwrap_or(NO_SPECIFICATIONS),
            memory.code_path,
            code,
            assets,
            REVIEW_CHECKLIST,
            VERDICT_FORMAT
        ))
    }

    fn on_generation_result(
        &mut self,
        task: &TaskRecord,
        memory: &mut ReviewerMemory,
        text: String,
    ) -> Result<(), ActorError> {
        let verdict = parse_verdict(&text);
        self.report(task, memory, verdict)
    }

    fn on_generation_error(
        &mut self,
        task: &TaskRecord,
        memory: &mut ReviewerMemory,
        err: GenerationError,
    ) -> Result<(), ActorError> {
        warn!("{}: review generation failed: {}", task.id, err);
        let verdict = Verdict {
            requires_fix: true,
            feedback: format!(
                "Automated review could not be completed ({}). Re-check the code against the specifications.",
                err
            ),
        };
        self.report(task, memory, verdict)
    }

    fn on_tool_result(
        &mut self,
        task: &TaskRecord,
        memory: &mut ReviewerMemory,
        tool: ToolName,
        outcome: ToolOutcome,
    ) -> Result<(), ActorError> {
        if memory.stage != ReviewerStage::Reading || tool != ToolName::FileRead {
            debug!("{}: unexpected {} result", task.id, tool);
            return Ok(());
        }
        let Some((target, path)) = memory.reads.pop_front() else {
            return Ok(());
        };
        let ok = outcome.is_success();
        let content = outcome.content.unwrap_or_else(|| outcome.result.clone());
        match target {
            ReadTarget::Code if ok => memory.code = Some(content),
            ReadTarget::Code => {
                warn!("{}: cannot read {}: {}", task.id, path, outcome.result);
                memory.reads.clear();
                let verdict = Verdict {
                    requires_fix: true,
                    feedback: format!("The code file {} could not be read: {}", path, outcome.result),
                };
                return self.report(task, memory, verdict);
            }
            ReadTarget::Asset(name) if ok => memory.assets.push((name, content)),
            ReadTarget::Specifications if ok => memory.specifications = Some(content),
            _ => debug!("{}: {} unavailable, reviewing without it", task.id, path),
        }
        Ok(())
    }

    fn on_peer_message(
        &mut self,
        sender: &str,
        message: PeerMessage,
        _active: Option<(&TaskRecord, &mut ReviewerMemory)>,
    ) -> Result<Vec<Action>, ActorError> {
        debug!("reviewer ignores {} from {}", message.type_name(), sender);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Location, TaskDetails};

    fn review_task() -> TaskRecord {
        TaskRecord::new(
            TaskKind::ReviewCode {
                code_path: "kayak/Coder/index.html".into(),
                specifications_path: Some("kayak/ProductManager/specs_kayak.md".into()),
                coordinator_task_id: "task_coord".into(),
            },
            "Review",
            TaskDetails {
                project_name: "kayak".into(),
                original_request: "Build a 2-page site about kayaking".into(),
                ..TaskDetails::default()
            },
            "reviewer-01",
        )
    }

    fn ctx() -> DecisionContext {
        DecisionContext {
            now: Instant::now(),
            location: Location::SaveZone,
        }
    }

    fn read_ok(content: &str) -> ToolOutcome {
        let mut outcome = ToolOutcome::success(content);
        outcome.content = Some(content.to_string());
        outcome
    }

    #[test]
    fn verdicts_are_parsed_and_checked() {
        assert_eq!(
            parse_verdict(r#"```json
{"requires_fix": false, "feedback": "Looks great"}
```"#),
            Verdict {
                requires_fix: false,
                feedback: "Looks great".into()
            }
        );
        assert!(parse_verdict(r#"{"requires_fix": false, "feedback": "The footer is cut off"}"#).requires_fix);
        assert!(parse_verdict("I like it").requires_fix);
        assert!(parse_verdict(r#"{"requires_fix": "no", "feedback": "ok"}"#).requires_fix);
    }

    #[tokio::test]
    async fn reads_everything_then_approves_to_planner_and_coordinator() {
        let mut reviewer = Reviewer::new(RoleDirectory::fixed());
        let task = review_task();
        let mut memory = reviewer.start_task(&task, Instant::now()).unwrap();

        let mut read_paths = Vec::new();
        while let Action::UseTool(ToolCall::FileRead { filename }) =
            reviewer.decide(&ctx(), &task, &mut memory).unwrap()
        {
            let content = format!("content of {}", filename);
            read_paths.push(filename);
            reviewer
                .on_tool_result(&task, &mut memory, ToolName::FileRead, read_ok(&content))
                .unwrap();
        }
        assert_eq!(
            read_paths,
            vec![
                "kayak/Coder/index.html",
                "kayak/Coder/css/style.css",
                "kayak/Coder/js/script.js",
                "kayak/ProductManager/specs_kayak.md"
            ]
        );
        assert_eq!(reviewer.decide(&ctx(), &task, &mut memory).unwrap(), Action::Generate);
        let prompt = reviewer.build_prompt(&task, &memory).unwrap();
        assert!(prompt.starts_with("You are a QA Engineer"));
        assert!(prompt.contains("content of kayak/Coder/css/style.css"));

        reviewer
            .on_generation_result(&task, &mut memory, r#"{"requires_fix": false, "feedback": "All good"}"#.into())
            .unwrap();
        let mut recipients = Vec::new();
        while let Action::Send { to, message } = reviewer.decide(&ctx(), &task, &mut memory).unwrap() {
            assert!(matches!(message, PeerMessage::ReviewApproved { .. }));
            recipients.push(to);
        }
        assert_eq!(recipients, vec!["planner-01", "coordinator-01"]);
        assert!(matches!(reviewer.decide(&ctx(), &task, &mut memory).unwrap(), Action::Complete(_)));
    }

    #[tokio::test]
    async fn unreadable_code_and_failed_generation_request_fixes() {
        let mut reviewer = Reviewer::new(RoleDirectory::fixed());
        let task = review_task();
        let mut memory = reviewer.start_task(&task, Instant::now()).unwrap();
        reviewer
            .on_tool_result(
                &task,
                &mut memory,
                ToolName::FileRead,
                ToolOutcome::error(&crate::errors::ToolError::NotFound("kayak/Coder/index.html".into())),
            )
            .unwrap();
        assert!(matches!(
            reviewer.decide(&ctx(), &task, &mut memory).unwrap(),
            Action::Send { ref to, message: PeerMessage::ReviewFeedback { .. } } if to == "coordinator-01"
        ));

        let mut memory = reviewer.start_task(&task, Instant::now()).unwrap();
        memory.reads.clear();
        memory.code = Some("<html></html>".into());
        reviewer
            .on_generation_error(&task, &mut memory, GenerationError::Timeout(std::time::Duration::from_secs(1)))
            .unwrap();
        match reviewer.decide(&ctx(), &task, &mut memory).unwrap() {
            Action::Send {
                message: PeerMessage::ReviewFeedback { feedback, specifications_path, .. },
                ..
            } => {
                assert!(feedback.contains("could not be completed"));
                assert_eq!(specifications_path.as_deref(), Some("kayak/ProductManager/specs_kayak.md"));
            }
            other => panic!("expected feedback, got {:?}", other),
        }
    }
}
