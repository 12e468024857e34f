use super::{ArtifactMemory, ArtifactRole, Delivery, InputKey, InputSpec, Role, TimeoutPolicy};
use crate::constants::{CSS_RULES, HTML_RULES, JS_RULES};
use crate::core::{ActorId, Component, PeerMessage, TaskKind, TaskRecord};
use std::time::Duration;

pub const STRUCTURE_DEPENDENCY: &str = "structure";

/// One of the HTML, CSS or JS specialists working for the coordinator.
///
/// Style and behavior tasks block on the page structure, which the coordinator forwards
/// once the HTML specialist has reported it.
#[derive(Debug, Clone)]
pub struct Specialist {
    component: Component,
    structure_timeout: Duration,
}

impl Specialist {
    pub fn new(component: Component, structure_timeout: Duration) -> Self {
        Self {
            component,
            structure_timeout,
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    fn label(&self) -> &'static str {
        match self.component {
            Component::Structure => "HTML",
            Component::Styles => "CSS",
            Component::Behavior => "JavaScript",
        }
    }

    fn rules(&self) -> &'static str {
        match self.component {
            Component::Structure => HTML_RULES,
            Component::Styles => CSS_RULES,
            Component::Behavior => JS_RULES,
        }
    }
}

/// Subject of the request, e.g. "kayaking" for "Build a 2-page site about kayaking".
pub fn request_topic(request: &str) -> String {
    match request.rsplit_once("about") {
        Some((_, topic)) if !topic.trim().is_empty() => topic.trim().trim_end_matches('.').to_string(),
        _ => "the requested topic".to_string(),
    }
}

/// Coordinator task, page and component a specialist task works on.
fn target(task: &TaskRecord) -> Option<(&str, &str, Component)> {
    match &task.kind {
        TaskKind::GenerateComponent {
            coordinator_task_id,
            page,
            component,
            ..
        }
        | TaskKind::FixComponent {
            coordinator_task_id,
            page,
            component,
            ..
        } => Some((coordinator_task_id.as_str(), page.as_str(), *component)),
        _ => None,
    }
}

impl ArtifactRole for Specialist {
    fn role(&self) -> Role {
        Role::for_component(self.component)
    }

    fn input(&self, task: &TaskRecord) -> Option<InputSpec> {
        match &task.kind {
            TaskKind::GenerateComponent {
                coordinator_task_id,
                page,
                component,
                ..
            } if *component != Component::Structure => Some(InputSpec {
                name: STRUCTURE_DEPENDENCY.to_string(),
                key: InputKey::Component {
                    coordinator_task_id: coordinator_task_id.clone(),
                    page: page.clone(),
                },
                delivery: Delivery::Inline,
                timeout: self.structure_timeout,
                on_timeout: TimeoutPolicy::Fail,
            }),
            _ => None,
        }
    }

    fn prompt(&self, task: &TaskRecord, memory: &ArtifactMemory) -> String {
        let topic = request_topic(&task.details.original_request);
        match &task.kind {
            TaskKind::FixComponent {
                page,
                specifications,
                current_code,
                structure,
                feedback,
                ..
            } => {
                let structure = match structure {
                    Some(html) if self.component != Component::Structure => format!(
                        "--- CURRENT HTML STRUCTURE ---\n{}\n--- END HTML STRUCTURE ---\n\n",
                        html
                    ),
                    _ => String::new(),
                };
                format!(
                    "You are an expert {label} Specialist agent fixing the {component} of the \"{page}\" page.\n\
                     The original user request topic was: \"{topic}\"\n\
                     You previously generated code which has received feedback from QA. Fix it based on the feedback \
                     and the original specifications, keeping the content relevant to {topic}.\n\n\
                     --- ORIGINAL SPECIFICATIONS ---\n{specifications}\n--- SPECIFICATIONS END ---\n\n\
                     --- QA FEEDBACK ---\n{feedback}\n--- QA FEEDBACK END ---\n\n\
                     {structure}\
                     --- CURRENT CODE TO FIX ---\n{current_code}\n--- CURRENT CODE END ---\n\n\
                     Return the complete corrected code. {rules}",
                    label = self.label(),
                    component = self.component,
                    rules = self.rules(),
                )
            }
            TaskKind::GenerateComponent {
                page,
                specifications,
                ..
            } => {
                let structure = match &memory.input {
                    Some(html) => format!(
                        "--- HTML STRUCTURE ---\n{}\n--- END HTML STRUCTURE ---\n\n",
                        html
                    ),
                    None => String::new(),
                };
                format!(
                    "You are an expert {label} Specialist agent creating the {component} for the \"{page}\" page \
                     of a larger web application.\n\
                     The original user request topic was: \"{topic}\"\n\
                     Populate it with specific content about {topic} for \"{page}\", not generic placeholders.\n\n\
                     --- SPECIFICATIONS START (review the sections relevant to \"{page}\") ---\n\
                     {specifications}\n--- SPECIFICATIONS END ---\n\n\
                     {structure}{rules}",
                    label = self.label(),
                    component = self.component,
                    rules = self.rules(),
                )
            }
            _ => format!(
                "You are an expert {} Specialist agent. {}\n\n{}",
                self.label(),
                task.description,
                self.rules()
            ),
        }
    }

    fn artifact_path(&self, _task: &TaskRecord) -> Option<String> {
        None
    }

    fn notification(&self, task: &TaskRecord, memory: &ArtifactMemory) -> Option<(ActorId, PeerMessage)> {
        let (coordinator_task_id, page, component) = target(task)?;
        Some((
            Role::Coordinator.actor_id().to_string(),
            PeerMessage::ComponentReady {
                coordinator_task_id: coordinator_task_id.to_string(),
                page: page.to_string(),
                component,
                code: memory.artifact.clone().unwrap_or_default(),
                is_fix: matches!(task.kind, TaskKind::FixComponent { .. }),
            },
        ))
    }

    fn failure_notice(&self, task: &TaskRecord, reason: &str) -> Option<(ActorId, PeerMessage)> {
        let (coordinator_task_id, page, component) = target(task)?;
        Some((
            Role::Coordinator.actor_id().to_string(),
            PeerMessage::ComponentFailed {
                coordinator_task_id: coordinator_task_id.to_string(),
                page: page.to_string(),
                component,
                error: reason.to_string(),
            },
        ))
    }

    fn summary(&self, task: &TaskRecord, memory: &ArtifactMemory) -> String {
        let page = target(task).map(|(_, page, _)| page).unwrap_or("unknown");
        format!(
            "{} for page '{}' delivered ({} chars)",
            self.component,
            page,
            memory.artifact.as_ref().map(|a| a.len()).unwrap_or(0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{Action, DecisionContext, Pipeline, RoleBehavior, Stage};
    use crate::core::{Location, TaskDetails};
    use tokio::time::Instant;

    fn generate_task(component: Component) -> TaskRecord {
        let mut task = TaskRecord::new(
            TaskKind::GenerateComponent {
                component,
                page: "Homepage".into(),
                coordinator_task_id: "task_c0ffee00".into(),
                specifications: "## Homepage Specifications\nHero with a kayak".into(),
            },
            "Generate component",
            TaskDetails {
                project_name: "kayak".into(),
                original_request: "Build a 2-page site about kayaking".into(),
                ..TaskDetails::default()
            },
            Role::for_component(component).actor_id(),
        );
        if component != Component::Structure {
            task.add_dependency(STRUCTURE_DEPENDENCY);
        }
        task
    }

    fn ctx() -> DecisionContext {
        DecisionContext {
            now: Instant::now(),
            location: Location::CssDesk,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn styles_are_not_generated_before_structure_arrives() {
        let mut css = Pipeline::new(Specialist::new(Component::Styles, Duration::from_secs(180)));
        let task = generate_task(Component::Styles);
        let mut memory = css.start_task(&task, Instant::now()).unwrap();

        for _ in 0..3 {
            assert_eq!(css.decide(&ctx(), &task, &mut memory).unwrap(), Action::Wait);
        }
        assert!(memory.input.is_none());

        // structure for another page does not unblock this task
        css.on_peer_message(
            "coordinator-01",
            PeerMessage::StructureReady {
                coordinator_task_id: "task_c0ffee00".into(),
                page: "About".into(),
                html: "<main>about</main>".into(),
            },
            Some((&task, &mut memory)),
        )
        .unwrap();
        assert_eq!(css.decide(&ctx(), &task, &mut memory).unwrap(), Action::Wait);

        let html = "<section id=\"hero\"><h1>Paddle on</h1></section>";
        css.on_peer_message(
            "coordinator-01",
            PeerMessage::StructureReady {
                coordinator_task_id: "task_c0ffee00".into(),
                page: "Homepage".into(),
                html: html.into(),
            },
            Some((&task, &mut memory)),
        )
        .unwrap();

        assert_eq!(memory.input.as_deref(), Some(html));
        assert_eq!(css.decide(&ctx(), &task, &mut memory).unwrap(), Action::Generate);
        let prompt = css.build_prompt(&task, &memory).unwrap();
        assert!(prompt.contains(html));
        assert!(prompt.contains("CSS Specialist"));
    }

    #[tokio::test(start_paused = true)]
    async fn structure_is_generated_immediately_and_handed_over_inline() {
        let mut html = Pipeline::new(Specialist::new(Component::Structure, Duration::from_secs(180)));
        let task = generate_task(Component::Structure);
        let mut memory = html.start_task(&task, Instant::now()).unwrap();
        assert_eq!(html.decide(&ctx(), &task, &mut memory).unwrap(), Action::Generate);

        html.on_generation_result(&task, &mut memory, "```html\n<main>kayaks</main>\n```".into())
            .unwrap();
        assert_eq!(memory.stage, Stage::Notifying);
        match html.decide(&ctx(), &task, &mut memory).unwrap() {
            Action::Send { to, message } => {
                assert_eq!(to, "coordinator-01");
                assert_eq!(
                    message,
                    PeerMessage::ComponentReady {
                        coordinator_task_id: "task_c0ffee00".into(),
                        page: "Homepage".into(),
                        component: Component::Structure,
                        code: "<main>kayaks</main>".into(),
                        is_fix: false,
                    }
                );
            }
            other => panic!("expected component report, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_structure_reports_failure_to_coordinator() {
        let mut js = Pipeline::new(Specialist::new(Component::Behavior, Duration::from_secs(5)));
        let task = generate_task(Component::Behavior);
        let start = Instant::now();
        let mut memory = js.start_task(&task, start).unwrap();
        let late = DecisionContext {
            now: start + Duration::from_secs(6),
            location: Location::JsDesk,
        };
        assert_eq!(js.decide(&late, &task, &mut memory).unwrap(), Action::Wait);
        assert!(matches!(
            js.decide(&late, &task, &mut memory).unwrap(),
            Action::Send {
                message: PeerMessage::ComponentFailed { component: Component::Behavior, .. },
                ..
            }
        ));
        assert!(matches!(js.decide(&late, &task, &mut memory).unwrap(), Action::Fail(_)));
    }

    #[test]
    fn topic_is_taken_after_about() {
        assert_eq!(request_topic("Build a 2-page site about kayaking"), "kayaking");
        assert_eq!(request_topic("Make a landing page"), "the requested topic");
    }
}
