//! The coordinator turns the specification into a code bundle.
//!
//! Pages are built one at a time. The first page fans out to all three specialists and
//! yields the shared stylesheet and script; later pages only need their structure. Once
//! every page is saved the main page goes to the reviewer, and review feedback is routed
//! back to the specialists whose component it mentions.

use super::{
    Action, DecisionContext, Role, RoleBehavior, RoleDirectory, SPECIFICATIONS_DEPENDENCY,
    STRUCTURE_DEPENDENCY,
};
use crate::constants::NO_SPECIFICATIONS;
use crate::core::{
    sanitize_name, Component, Delegation, PeerMessage, SupervisorRequest, TaskDetails, TaskKind,
    TaskRecord,
};
use crate::errors::ActorError;
use crate::tools::{ToolCall, ToolName, ToolOutcome};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_PAGE: &str = "index";
pub const STYLESHEET: &str = "css/style.css";
pub const SCRIPT: &str = "js/script.js";

/// Page names declared by `## <Name> Specifications` headings, in order.
pub fn parse_pages(specifications: &str) -> Vec<String> {
    const SUFFIX: &str = "specifications";
    let mut pages: Vec<String> = Vec::new();
    for line in specifications.lines() {
        let line = line.trim();
        if !line.starts_with("##") {
            continue;
        }
        let heading = line.trim_start_matches('#').trim().trim_end_matches(':').trim_end();
        let Some(split) = heading.len().checked_sub(SUFFIX.len()) else {
            continue;
        };
        if !heading.is_char_boundary(split) {
            continue;
        }
        let (name, suffix) = heading.split_at(split);
        let name = name.trim();
        if !suffix.eq_ignore_ascii_case(SUFFIX) || name.is_empty() {
            continue;
        }
        if !pages.iter().any(|p| p.eq_ignore_ascii_case(name)) {
            pages.push(name.to_string());
        }
    }
    if pages.is_empty() {
        pages.push(DEFAULT_PAGE.to_string());
    }
    pages
}

/// Components a review comment is about. Feedback naming none of them concerns all three.
pub fn components_for_feedback(feedback: &str) -> Vec<Component> {
    let lower = feedback.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |pred: &dyn Fn(&str) -> bool| words.iter().any(|w| pred(w));

    let mut found = Vec::new();
    if mentions(&|w| matches!(w, "html" | "tag" | "tags" | "structure" | "structural" | "markup")) {
        found.push(Component::Structure);
    }
    if mentions(&|w| w == "css" || w.starts_with("style")) {
        found.push(Component::Styles);
    }
    if mentions(&|w| matches!(w, "js" | "javascript" | "script" | "scripts")) {
        found.push(Component::Behavior);
    }
    if found.is_empty() {
        Component::ALL.to_vec()
    } else {
        found
    }
}

/// File name of the page at `index`; the first page is the site's entry point.
pub fn page_file_name(page: &str, index: usize) -> String {
    if index == 0 {
        return "index.html".to_string();
    }
    let name = sanitize_name(page).replace('/', "_").to_lowercase();
    if name == DEFAULT_PAGE {
        format!("{}_{}.html", name, index)
    } else {
        format!("{}.html", name)
    }
}

/// Wraps a body fragment into a complete document linking the shared assets.
pub fn assemble_page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         \x20   <meta charset=\"UTF-8\">\n\
         \x20   <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         \x20   <title>{}</title>\n\
         \x20   <link rel=\"stylesheet\" href=\"{}\">\n\
         </head>\n\
         <body>\n\
         {}\n\
         \x20   <script src=\"{}\" defer></script>\n\
         </body>\n\
         </html>\n",
        title, STYLESHEET, body, SCRIPT
    )
}

/// Timeouts and bounds of the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorLimits {
    pub dependency_timeout: Duration,
    pub component_timeout: Duration,
    pub review_timeout: Duration,
    pub max_fix_rounds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorStage {
    AwaitingSpecs { since: Instant },
    ReadingSpecs { path: String },
    Delegating,
    AwaitingComponents { since: Instant },
    Assembling,
    Saving,
    RequestingReview,
    AwaitingReview { since: Instant },
    DelegatingFix { feedback: String },
    AwaitingFix { since: Instant },
    Exhausted { feedback: String, notified: bool },
    Done(String),
}

#[derive(Debug, Clone)]
pub struct CoordinatorMemory {
    pub stage: CoordinatorStage,
    pub project_name: String,
    pub specs_path: Option<String>,
    pub specifications: String,
    pub pages: Vec<String>,
    pub page_index: usize,
    /// Components of the page being built
    pub codes: BTreeMap<Component, String>,
    pub pending: BTreeSet<Component>,
    /// Components of the first page, shared assets included
    pub main_codes: BTreeMap<Component, String>,
    pub save_queue: VecDeque<(String, String)>,
    pub main_html_path: Option<String>,
    pub fix_round: u32,
    pub fixing: bool,
}

impl CoordinatorMemory {
    fn current_page(&self) -> &str {
        self.pages
            .get(self.page_index)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PAGE)
    }

    fn with_specifications(&mut self, specifications: String) {
        self.pages = parse_pages(&specifications);
        self.specifications = specifications;
        self.page_index = 0;
        self.stage = CoordinatorStage::Delegating;
    }
}

pub struct Coordinator {
    directory: RoleDirectory,
    limits: CoordinatorLimits,
    /// Specification paths announced before the matching task arrived, by project
    early_specs: HashMap<String, String>,
}

impl Coordinator {
    pub fn new(directory: RoleDirectory, limits: CoordinatorLimits) -> Self {
        Self {
            directory,
            limits,
            early_specs: HashMap::new(),
        }
    }

    fn details(task: &TaskRecord) -> TaskDetails {
        TaskDetails {
            original_request: task.details.original_request.clone(),
            project_name: task.details.project_name.clone(),
            originating_task_id: Some(task.id.clone()),
            ..TaskDetails::default()
        }
    }

    fn delegate_page(
        &self,
        task: &TaskRecord,
        memory: &mut CoordinatorMemory,
        now: Instant,
    ) -> Result<Action, ActorError> {
        let page = memory.current_page().to_string();
        let components: &[Component] = if memory.page_index == 0 {
            &Component::ALL
        } else {
            &[Component::Structure]
        };
        let mut tasks = Vec::with_capacity(components.len());
        for component in components {
            let target = self.directory.resolve(Role::for_component(*component))?.clone();
            let dependencies = if *component == Component::Structure {
                Vec::new()
            } else {
                vec![STRUCTURE_DEPENDENCY.to_string()]
            };
            tasks.push(Delegation {
                target,
                kind: TaskKind::GenerateComponent {
                    component: *component,
                    page: page.clone(),
                    coordinator_task_id: task.id.clone(),
                    specifications: memory.specifications.clone(),
                },
                description: format!("Generate {} for page '{}'", component, page),
                details: Self::details(task),
                dependencies,
            });
        }
        info!(
            "{}: page {}/{} '{}' delegated to {} specialist(s)",
            task.id,
            memory.page_index + 1,
            memory.pages.len(),
            page,
            tasks.len()
        );
        memory.codes.clear();
        memory.pending = components.iter().copied().collect();
        memory.stage = CoordinatorStage::AwaitingComponents { since: now };
        Ok(Action::Request(SupervisorRequest::Delegate {
            origin_task_id: Some(task.id.clone()),
            tasks,
        }))
    }

    fn delegate_fix(
        &self,
        task: &TaskRecord,
        memory: &mut CoordinatorMemory,
        feedback: &str,
        now: Instant,
    ) -> Result<Action, ActorError> {
        memory.page_index = 0;
        memory.codes = memory.main_codes.clone();
        let page = memory.current_page().to_string();
        let structure = memory.codes.get(&Component::Structure).cloned();
        let components = components_for_feedback(feedback);
        let mut tasks = Vec::with_capacity(components.len());
        for component in &components {
            let target = self.directory.resolve(Role::for_component(*component))?.clone();
            tasks.push(Delegation {
                target,
                kind: TaskKind::FixComponent {
                    component: *component,
                    page: page.clone(),
                    coordinator_task_id: task.id.clone(),
                    specifications: memory.specifications.clone(),
                    current_code: memory.codes.get(component).cloned().unwrap_or_default(),
                    structure: (*component != Component::Structure)
                        .then(|| structure.clone())
                        .flatten(),
                    feedback: feedback.to_string(),
                },
                description: format!(
                    "Fix {} of page '{}' (round {})",
                    component, page, memory.fix_round
                ),
                details: Self::details(task),
                dependencies: Vec::new(),
            });
        }
        info!("{}: fix round {} for {:?}", task.id, memory.fix_round, components);
        memory.pending = components.into_iter().collect();
        memory.stage = CoordinatorStage::AwaitingFix { since: now };
        Ok(Action::Request(SupervisorRequest::Delegate {
            origin_task_id: Some(task.id.clone()),
            tasks,
        }))
    }

    /// Queues the current page (and the shared assets for the first page) for saving.
    fn assemble(&self, task: &TaskRecord, memory: &mut CoordinatorMemory) {
        let page = memory.current_page().to_string();
        let body = memory
            .codes
            .get(&Component::Structure)
            .cloned()
            .unwrap_or_else(|| Component::Structure.placeholder(&page));
        let coder_dir = format!("{}/Coder", memory.project_name);
        let path = format!("{}/{}", coder_dir, page_file_name(&page, memory.page_index));
        memory
            .save_queue
            .push_back((path.clone(), assemble_page(&page, &body)));

        if memory.page_index == 0 {
            for component in [Component::Styles, Component::Behavior] {
                let code = memory
                    .codes
                    .get(&component)
                    .cloned()
                    .unwrap_or_else(|| component.placeholder(&page));
                let asset = if component == Component::Styles { STYLESHEET } else { SCRIPT };
                memory
                    .save_queue
                    .push_back((format!("{}/{}", coder_dir, asset), code));
            }
            memory.main_codes = memory.codes.clone();
            memory.main_html_path = Some(path);
        }
        debug!("{}: {} file(s) queued for '{}'", task.id, memory.save_queue.len(), page);
        memory.stage = CoordinatorStage::Saving;
    }

    /// Where to go once the save queue is empty.
    fn after_saving(memory: &mut CoordinatorMemory) {
        if !memory.fixing && memory.page_index + 1 < memory.pages.len() {
            memory.page_index += 1;
            memory.stage = CoordinatorStage::Delegating;
        } else {
            memory.stage = CoordinatorStage::RequestingReview;
        }
    }

    /// Whether a specialist report belongs to the batch currently awaited.
    fn expects(
        task: &TaskRecord,
        memory: &CoordinatorMemory,
        coordinator_task_id: &str,
        page: &str,
        component: Component,
    ) -> bool {
        task.id == coordinator_task_id
            && page == memory.current_page()
            && memory.pending.contains(&component)
            && matches!(
                memory.stage,
                CoordinatorStage::AwaitingComponents { .. } | CoordinatorStage::AwaitingFix { .. }
            )
    }

    /// Hands the page structure to the style and behavior specialists still waiting on it.
    fn forward_structure(
        &self,
        task: &TaskRecord,
        memory: &CoordinatorMemory,
        html: &str,
    ) -> Result<Vec<Action>, ActorError> {
        let mut actions = Vec::new();
        if !matches!(memory.stage, CoordinatorStage::AwaitingComponents { .. }) {
            return Ok(actions);
        }
        for component in [Component::Styles, Component::Behavior] {
            if memory.pending.contains(&component) {
                actions.push(Action::Send {
                    to: self.directory.resolve(Role::for_component(component))?.clone(),
                    message: PeerMessage::StructureReady {
                        coordinator_task_id: task.id.clone(),
                        page: memory.current_page().to_string(),
                        html: html.to_string(),
                    },
                });
            }
        }
        Ok(actions)
    }
}

impl RoleBehavior for Coordinator {
    type Memory = CoordinatorMemory;

    fn role(&self) -> Role {
        Role::Coordinator
    }

    fn start_task(&mut self, task: &TaskRecord, now: Instant) -> Result<CoordinatorMemory, ActorError> {
        if task.kind != TaskKind::WriteCode {
            return Err(ActorError::Protocol(format!(
                "coordinator cannot handle {} tasks",
                task.kind.name()
            )));
        }
        let project = task.details.project_name.clone();
        let mut memory = CoordinatorMemory {
            stage: CoordinatorStage::Delegating,
            project_name: project.clone(),
            specs_path: None,
            specifications: NO_SPECIFICATIONS.to_string(),
            pages: vec![DEFAULT_PAGE.to_string()],
            page_index: 0,
            codes: BTreeMap::new(),
            pending: BTreeSet::new(),
            main_codes: BTreeMap::new(),
            save_queue: VecDeque::new(),
            main_html_path: None,
            fix_round: 0,
            fixing: false,
        };
        let Some(dependency) = task.dependencies.get(SPECIFICATIONS_DEPENDENCY) else {
            info!("{}: no specifications planned, building a single page", task.id);
            return Ok(memory);
        };
        let known = dependency
            .content
            .clone()
            .filter(|_| dependency.ready)
            .or_else(|| self.early_specs.remove(&project));
        memory.stage = match known {
            Some(path) => {
                memory.specs_path = Some(path.clone());
                CoordinatorStage::ReadingSpecs { path }
            }
            None => CoordinatorStage::AwaitingSpecs { since: now },
        };
        Ok(memory)
    }

    fn decide(
        &mut self,
        ctx: &DecisionContext,
        task: &TaskRecord,
        memory: &mut CoordinatorMemory,
    ) -> Result<Action, ActorError> {
        match memory.stage.clone() {
            CoordinatorStage::AwaitingSpecs { since } => {
                let waited = ctx.now.saturating_duration_since(since);
                if waited >= self.limits.dependency_timeout {
                    return Err(ActorError::DependencyTimeout {
                        dependency: SPECIFICATIONS_DEPENDENCY.to_string(),
                        waited,
                    });
                }
                Ok(Action::Wait)
            }
            CoordinatorStage::ReadingSpecs { path } => {
                Ok(Action::UseTool(ToolCall::FileRead { filename: path }))
            }
            CoordinatorStage::Delegating => self.delegate_page(task, memory, ctx.now),
            CoordinatorStage::AwaitingComponents { since } | CoordinatorStage::AwaitingFix { since } => {
                if !memory.pending.is_empty()
                    && ctx.now.saturating_duration_since(since) >= self.limits.component_timeout
                {
                    let page = memory.current_page().to_string();
                    let missing: Vec<Component> = memory.pending.iter().copied().collect();
                    warn!("{}: {:?} for '{}' timed out", task.id, missing, page);
                    for component in missing {
                        // a fix that never came back keeps the previous code
                        if !memory.fixing || !memory.codes.contains_key(&component) {
                            memory.codes.insert(component, component.placeholder(&page));
                        }
                    }
                    memory.pending.clear();
                }
                if memory.pending.is_empty() {
                    memory.stage = CoordinatorStage::Assembling;
                }
                Ok(Action::Wait)
            }
            CoordinatorStage::Assembling => {
                self.assemble(task, memory);
                Ok(Action::Wait)
            }
            CoordinatorStage::Saving => match memory.save_queue.front() {
                Some((filename, content)) => Ok(Action::UseTool(ToolCall::FileWrite {
                    filename: filename.clone(),
                    content: content.clone(),
                })),
                None => {
                    Self::after_saving(memory);
                    Ok(Action::Wait)
                }
            },
            CoordinatorStage::RequestingReview => {
                let code_path = memory
                    .main_html_path
                    .clone()
                    .ok_or_else(|| ActorError::Internal("no page was saved".into()))?;
                let reviewer = self.directory.resolve(Role::Reviewer)?.clone();
                memory.stage = CoordinatorStage::AwaitingReview { since: ctx.now };
                Ok(Action::Request(SupervisorRequest::Delegate {
                    origin_task_id: Some(task.id.clone()),
                    tasks: vec![Delegation {
                        target: reviewer,
                        kind: TaskKind::ReviewCode {
                            code_path: code_path.clone(),
                            specifications_path: memory.specs_path.clone(),
                            coordinator_task_id: task.id.clone(),
                        },
                        description: format!("Review {}", code_path),
                        details: Self::details(task),
                        dependencies: Vec::new(),
                    }],
                }))
            }
            CoordinatorStage::AwaitingReview { since } => {
                let waited = ctx.now.saturating_duration_since(since);
                if waited >= self.limits.review_timeout {
                    return Err(ActorError::DependencyTimeout {
                        dependency: "review".to_string(),
                        waited,
                    });
                }
                Ok(Action::Wait)
            }
            CoordinatorStage::DelegatingFix { feedback } => {
                self.delegate_fix(task, memory, &feedback, ctx.now)
            }
            CoordinatorStage::Exhausted { feedback, notified } => {
                let rounds = self.limits.max_fix_rounds;
                if !notified {
                    memory.stage = CoordinatorStage::Exhausted {
                        feedback: feedback.clone(),
                        notified: true,
                    };
                    return Ok(Action::Send {
                        to: self.directory.resolve(Role::Planner)?.clone(),
                        message: PeerMessage::FixBoundExhausted {
                            project_name: memory.project_name.clone(),
                            rounds,
                            feedback,
                        },
                    });
                }
                Ok(Action::Fail(format!(
                    "Code still rejected after {} fix rounds",
                    rounds
                )))
            }
            CoordinatorStage::Done(summary) => Ok(Action::Complete(summary)),
        }
    }

    fn build_prompt(&self, _task: &TaskRecord, _memory: &CoordinatorMemory) -> Result<String, ActorError> {
        Err(ActorError::Protocol(
            "coordinator delegates generation to its specialists".into(),
        ))
    }

    fn on_generation_result(
        &mut self,
        _task: &TaskRecord,
        _memory: &mut CoordinatorMemory,
        _text: String,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    fn on_tool_result(
        &mut self,
        task: &TaskRecord,
        memory: &mut CoordinatorMemory,
        tool: ToolName,
        outcome: ToolOutcome,
    ) -> Result<(), ActorError> {
        match (memory.stage.clone(), tool) {
            (CoordinatorStage::ReadingSpecs { .. }, ToolName::FileRead) => {
                let specifications = if outcome.is_success() {
                    outcome.content.unwrap_or(outcome.result)
                } else {
                    warn!("{}: cannot read specifications ({})", task.id, outcome.result);
                    NO_SPECIFICATIONS.to_string()
                };
                memory.with_specifications(specifications);
                info!("{}: pages {:?}", task.id, memory.pages);
                Ok(())
            }
            (CoordinatorStage::Saving, ToolName::FileWrite) => {
                if !outcome.is_success() {
                    return Err(ActorError::Tool(outcome.result));
                }
                memory.save_queue.pop_front();
                Ok(())
            }
            (stage, tool) => {
                debug!("{}: unexpected {} result in {:?}", task.id, tool, stage);
                Ok(())
            }
        }
    }

    fn on_peer_message(
        &mut self,
        sender: &str,
        message: PeerMessage,
        active: Option<(&TaskRecord, &mut CoordinatorMemory)>,
    ) -> Result<Vec<Action>, ActorError> {
        let Some((task, memory)) = active else {
            match message {
                PeerMessage::DependencyReady {
                    dependency,
                    path,
                    project_name,
                    ..
                } if dependency == SPECIFICATIONS_DEPENDENCY => {
                    debug!("keeping specifications for '{}' until its task arrives", project_name);
                    self.early_specs.insert(project_name, path);
                }
                other => {
                    debug!("coordinator idle, dropping {} from {}", other.type_name(), sender);
                }
            }
            return Ok(Vec::new());
        };

        match message {
            PeerMessage::DependencyReady {
                dependency,
                path,
                project_name,
                ..
            } if dependency == SPECIFICATIONS_DEPENDENCY => {
                if project_name == memory.project_name
                    && matches!(memory.stage, CoordinatorStage::AwaitingSpecs { .. })
                {
                    info!("{}: specifications ready at {}", task.id, path);
                    memory.specs_path = Some(path.clone());
                    memory.stage = CoordinatorStage::ReadingSpecs { path };
                } else {
                    self.early_specs.insert(project_name, path);
                }
                Ok(Vec::new())
            }
            PeerMessage::ComponentReady {
                coordinator_task_id,
                page,
                component,
                code,
                ..
            } => {
                if !Self::expects(task, memory, &coordinator_task_id, &page, component) {
                    debug!("{}: ignoring late {} for '{}'", task.id, component, page);
                    return Ok(Vec::new());
                }
                info!("{}: {} for '{}' ready from {}", task.id, component, page, sender);
                memory.pending.remove(&component);
                let actions = if component == Component::Structure {
                    self.forward_structure(task, memory, &code)?
                } else {
                    Vec::new()
                };
                memory.codes.insert(component, code);
                Ok(actions)
            }
            PeerMessage::ComponentFailed {
                coordinator_task_id,
                page,
                component,
                error,
            } => {
                if !Self::expects(task, memory, &coordinator_task_id, &page, component) {
                    return Ok(Vec::new());
                }
                warn!("{}: {} for '{}' failed: {}", task.id, component, page, error);
                memory.pending.remove(&component);
                if memory.fixing && memory.codes.contains_key(&component) {
                    return Ok(Vec::new());
                }
                let placeholder = component.placeholder(&page);
                let actions = if component == Component::Structure {
                    self.forward_structure(task, memory, &placeholder)?
                } else {
                    Vec::new()
                };
                memory.codes.insert(component, placeholder);
                Ok(actions)
            }
            PeerMessage::ReviewFeedback {
                coordinator_task_id,
                feedback,
                ..
            } if coordinator_task_id == task.id => {
                if !matches!(memory.stage, CoordinatorStage::AwaitingReview { .. }) {
                    return Ok(Vec::new());
                }
                memory.fix_round += 1;
                memory.fixing = true;
                memory.stage = if memory.fix_round > self.limits.max_fix_rounds {
                    warn!("{}: fix bound of {} exhausted", task.id, self.limits.max_fix_rounds);
                    CoordinatorStage::Exhausted {
                        feedback,
                        notified: false,
                    }
                } else {
                    CoordinatorStage::DelegatingFix { feedback }
                };
                Ok(Vec::new())
            }
            PeerMessage::ReviewApproved {
                coordinator_task_id,
                code_path,
                ..
            } if coordinator_task_id == task.id => {
                info!("{}: {} approved", task.id, code_path);
                memory.stage = CoordinatorStage::Done(format!(
                    "Code for '{}' approved after {} fix round(s): {}",
                    memory.project_name, memory.fix_round, code_path
                ));
                Ok(Vec::new())
            }
            other => {
                debug!("{}: ignoring {} from {}", task.id, other.type_name(), sender);
                Ok(Vec::new())
            }
        }
    }
}
