//! The supervisor owns the task registry, routes every message between actors, runs tool
//! calls and paces travel. It is the only place task records are mutated.

mod delegation;
mod observer;
mod routing;
mod run;
mod transition;

pub use observer::*;

use crate::actors::{
    ActorHandle, ActorSettings, Coordinator, CoordinatorLimits, Marketer, Pipeline, Planner, Relay,
    Reviewer, Role, RoleDirectory, Specialist, Specifier,
};
use crate::config::SimulationConfig;
use crate::core::{ActorId, Component, Envelope, Location, TaskId, TaskRecord};
use crate::errors::Error;
use crate::llm::GenerationService;
use crate::tools::{Sandbox, SearchClient, ToolExecutor};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::info;

/// Environment variable consulted when no search endpoint is configured.
pub const SEARCH_ENDPOINT_VAR: &str = "SEARCH_API_URL";

/// Messages from outside the actor mesh.
#[derive(Debug, Clone)]
pub enum Inbound {
    SubmitRequest(String),
    SubmitUserResponse { task_id: TaskId, text: String },
    Stop,
}

/// An actor reached the end of its travel time.
#[derive(Debug, Clone)]
pub(crate) struct ArrivalDue {
    pub actor: ActorId,
    pub to: Location,
    pub trip: u64,
}

/// Cloneable entry point for the external boundary.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    inbound_tx: UnboundedSender<Inbound>,
}

impl SupervisorHandle {
    /// Submits the request that starts the project. Returns `false` once the run is over.
    pub fn submit_request(&self, request: impl Into<String>) -> bool {
        self.inbound_tx
            .send(Inbound::SubmitRequest(request.into()))
            .is_ok()
    }

    /// Answers a pending clarification question.
    pub fn submit_user_response(&self, task_id: impl Into<TaskId>, text: impl Into<String>) -> bool {
        self.inbound_tx
            .send(Inbound::SubmitUserResponse {
                task_id: task_id.into(),
                text: text.into(),
            })
            .is_ok()
    }

    /// Asks the run loop to shut down.
    pub fn stop(&self) -> bool {
        self.inbound_tx.send(Inbound::Stop).is_ok()
    }
}

/// How a run ended, with the final task registry.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub message: String,
    pub iterations: u64,
    /// Every task record, oldest first
    pub tasks: Vec<TaskRecord>,
}

pub struct Supervisor {
    config: SimulationConfig,
    directory: RoleDirectory,
    actors: HashMap<ActorId, ActorHandle>,
    tasks: BTreeMap<TaskId, TaskRecord>,
    tools: Arc<ToolExecutor>,
    observer: Arc<dyn Observer>,
    envelope_tx: UnboundedSender<Envelope>,
    envelope_rx: UnboundedReceiver<Envelope>,
    timer_tx: UnboundedSender<ArrivalDue>,
    timer_rx: UnboundedReceiver<ArrivalDue>,
    inbound_rx: UnboundedReceiver<Inbound>,
    /// Trip number and destination of every actor currently travelling
    transit: HashMap<ActorId, (u64, Location)>,
    next_trip: u64,
    project: Option<String>,
    outcome: Option<(bool, String)>,
    iterations: u64,
}

impl Supervisor {
    /// Builds the tool executor and the full cast of actors. Actors start with [`run`](Self::run).
    ///
    /// # Arguments
    /// * `config` - Simulation configuration
    /// * `generation` - Generation service shared by every actor
    /// * `observer` - Receives state changes and the final outcome
    ///
    /// # Returns
    /// * `Result<(Supervisor, SupervisorHandle), Error>` - The supervisor and its external
    ///   handle, or an error if the sandbox or search endpoint is unusable
    pub fn new(
        config: SimulationConfig,
        generation: Arc<dyn GenerationService>,
        observer: Arc<dyn Observer>,
    ) -> Result<(Self, SupervisorHandle), Error> {
        let sandbox = Sandbox::new(&config.sandbox.root)?;
        let endpoint = config
            .search
            .endpoint
            .clone()
            .or_else(|| std::env::var(SEARCH_ENDPOINT_VAR).ok())
            .filter(|e| !e.trim().is_empty());
        let search = SearchClient::new(endpoint.as_deref())?;
        let search_enabled = search.is_enabled();
        info!(
            "sandbox at {}, search {}",
            sandbox.root().display(),
            if search_enabled { "enabled" } else { "disabled" }
        );

        let (envelope_tx, envelope_rx) = unbounded_channel();
        let (timer_tx, timer_rx) = unbounded_channel();
        let (inbound_tx, inbound_rx) = unbounded_channel();
        let directory = RoleDirectory::fixed();

        let settings = ActorSettings {
            provider: config.llm.provider,
            model: config.llm.model.clone(),
            tick: config.runtime.actor_tick,
            tool_timeout: config.runtime.tool_timeout,
            generation_timeout: config.llm.request_timeout,
        };
        let mut actors = HashMap::new();
        for role in Role::ALL {
            let handle = build_actor(
                role,
                &config,
                &directory,
                search_enabled,
                envelope_tx.clone(),
                generation.clone(),
                settings.clone(),
            );
            actors.insert(handle.id.clone(), handle);
        }

        let supervisor = Self {
            config,
            directory,
            actors,
            tasks: BTreeMap::new(),
            tools: Arc::new(ToolExecutor::new(sandbox, search)),
            observer,
            envelope_tx,
            envelope_rx,
            timer_tx,
            timer_rx,
            inbound_rx,
            transit: HashMap::new(),
            next_trip: 0,
            project: None,
            outcome: None,
            iterations: 0,
        };
        Ok((supervisor, SupervisorHandle { inbound_tx }))
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn actor_ids(&self) -> Vec<ActorId> {
        let mut ids: Vec<ActorId> = self.actors.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Creates the actor playing `role`.
fn build_actor(
    role: Role,
    config: &SimulationConfig,
    directory: &RoleDirectory,
    search_enabled: bool,
    outbox: UnboundedSender<Envelope>,
    generation: Arc<dyn GenerationService>,
    settings: ActorSettings,
) -> ActorHandle {
    let runtime = &config.runtime;
    let id = role.actor_id();
    let specialist =
        |component: Component| Pipeline::new(Specialist::new(component, runtime.component_timeout));
    match role {
        Role::Relay => ActorHandle::new(
            id,
            Relay::new(directory.clone()),
            outbox,
            generation,
            settings,
        ),
        Role::Planner => ActorHandle::new(
            id,
            Planner::new(directory.clone(), runtime.user_response_timeout),
            outbox,
            generation,
            settings,
        ),
        Role::Marketer => ActorHandle::new(
            id,
            Pipeline::new(Marketer::new(search_enabled)),
            outbox,
            generation,
            settings,
        ),
        Role::Specifier => ActorHandle::new(
            id,
            Pipeline::new(Specifier::new(runtime.dependency_timeout)),
            outbox,
            generation,
            settings,
        ),
        Role::Coordinator => ActorHandle::new(
            id,
            Coordinator::new(
                directory.clone(),
                CoordinatorLimits {
                    dependency_timeout: runtime.coordinator_dependency_timeout,
                    component_timeout: runtime.component_timeout,
                    review_timeout: runtime.review_timeout,
                    max_fix_rounds: runtime.max_fix_rounds,
                },
            ),
            outbox,
            generation,
            settings,
        ),
        Role::HtmlSpecialist => ActorHandle::new(
            id,
            specialist(Component::Structure),
            outbox,
            generation,
            settings,
        ),
        Role::CssSpecialist => ActorHandle::new(
            id,
            specialist(Component::Styles),
            outbox,
            generation,
            settings,
        ),
        Role::JsSpecialist => ActorHandle::new(
            id,
            specialist(Component::Behavior),
            outbox,
            generation,
            settings,
        ),
        Role::Reviewer => ActorHandle::new(
            id,
            Reviewer::new(directory.clone()),
            outbox,
            generation,
            settings,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Delegation, DependencySignal, SupervisorRequest, TaskDetails, TaskKind, TaskStatus,
    };
    use crate::errors::{ActorError, GenerationError};
    use crate::llm::Provider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl GenerationService for Unreachable {
        async fn generate(
            &self,
            _provider: Provider,
            _prompt: &str,
            _model: Option<&str>,
        ) -> Result<String, GenerationError> {
            Err(GenerationError::Rejected("offline".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        questions: Mutex<Vec<(String, String)>>,
        endings: Mutex<Vec<(String, bool)>>,
    }

    impl Observer for Recorder {
        fn on_actor_state_changed(&self, _actor_id: &str, _snapshot: &crate::actors::ActorSnapshot) {}

        fn on_task_state_changed(&self, _task_id: &str, _task: &TaskRecord) {}

        fn on_user_input_needed(&self, task_id: &str, question: &str) {
            self.questions
                .lock()
                .unwrap()
                .push((task_id.to_string(), question.to_string()));
        }

        fn on_simulation_ended(&self, message: &str, success: bool) {
            self.endings.lock().unwrap().push((message.to_string(), success));
        }
    }

    fn supervisor(
        dir: &tempfile::TempDir,
        max_iterations: u64,
    ) -> (Supervisor, SupervisorHandle, Arc<Recorder>) {
        let mut config = SimulationConfig::default();
        config.sandbox.root = dir.path().display().to_string();
        config.search.endpoint = None;
        config.travel.time_scale = 0.0;
        config.runtime.actor_tick = Duration::from_millis(1);
        config.runtime.run_tick = Duration::from_millis(1);
        config.runtime.max_iterations = max_iterations;
        let recorder = Arc::new(Recorder::default());
        let (supervisor, handle) =
            Supervisor::new(config, Arc::new(Unreachable), recorder.clone()).unwrap();
        (supervisor, handle, recorder)
    }

    fn decompose_task() -> TaskRecord {
        let mut task = TaskRecord::new(
            TaskKind::DecomposeRequest {
                request: "Build a site about kayaking".into(),
            },
            "Decompose",
            TaskDetails {
                project_name: "kayak".into(),
                ..TaskDetails::default()
            },
            "planner-01",
        );
        task.transition(TaskStatus::InProgress);
        task
    }

    #[tokio::test]
    async fn clarification_waits_for_the_user_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut supervisor, _handle, recorder) = supervisor(&dir, 100);
        let task = decompose_task();
        let task_id = task.id.clone();
        supervisor.tasks.insert(task_id.clone(), task);

        // an answer before any question is ignored
        assert!(supervisor.handle_inbound(Inbound::SubmitUserResponse {
            task_id: task_id.clone(),
            text: "too early".into(),
        }));
        assert_eq!(supervisor.task(&task_id).unwrap().status, TaskStatus::InProgress);

        supervisor.handle_request(
            "relay-01",
            SupervisorRequest::RequestUserInput {
                task_id: task_id.clone(),
                question: "Which colors?".into(),
            },
        );
        assert_eq!(
            supervisor.task(&task_id).unwrap().status,
            TaskStatus::WaitingUserInput
        );
        assert_eq!(
            recorder.questions.lock().unwrap().as_slice(),
            &[(task_id.clone(), "Which colors?".to_string())]
        );

        assert!(supervisor.handle_inbound(Inbound::SubmitUserResponse {
            task_id: task_id.clone(),
            text: "Ocean blue".into(),
        }));
        assert_eq!(supervisor.task(&task_id).unwrap().status, TaskStatus::InProgress);
        assert!(!supervisor.handle_inbound(Inbound::Stop));
    }

    #[tokio::test]
    async fn iteration_bound_ends_the_run_without_success() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _handle, recorder) = supervisor(&dir, 3);
        let outcome = supervisor.run().await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Maximum iterations (3) reached");
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.tasks.is_empty());
        assert_eq!(
            recorder.endings.lock().unwrap().as_slice(),
            &[("Maximum iterations (3) reached".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn delegation_to_unknown_actor_is_recorded_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut supervisor, _handle, _recorder) = supervisor(&dir, 100);
        let parent = decompose_task();
        let parent_id = parent.id.clone();
        supervisor.tasks.insert(parent_id.clone(), parent);

        supervisor.delegate(
            Some(&parent_id),
            vec![Delegation {
                target: "designer-01".into(),
                kind: TaskKind::WriteCode,
                description: "Draw a logo".into(),
                details: TaskDetails::default(),
                dependencies: Vec::new(),
            }],
        );

        let children = supervisor.task(&parent_id).unwrap().child_tasks.clone();
        assert_eq!(children.len(), 1);
        let failed = supervisor.task(&children[0]).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(
            failed.result.as_deref(),
            Some(ActorError::TaskAssignment("designer-01".into()).to_string().as_str())
        );
    }

    fn component_task(coordinator: &str, page: &str) -> TaskRecord {
        TaskRecord::new(
            TaskKind::GenerateComponent {
                component: Component::Structure,
                page: page.into(),
                coordinator_task_id: coordinator.into(),
                specifications: String::new(),
            },
            "Generate HTML",
            TaskDetails {
                project_name: "kayak".into(),
                ..TaskDetails::default()
            },
            "css-01",
        )
    }

    fn signal(project: &str, coordinator: Option<&str>, page: Option<&str>) -> DependencySignal {
        let mut metadata = BTreeMap::from([("project_name".to_string(), json!(project))]);
        if let Some(page) = page {
            metadata.insert("page".to_string(), json!(page));
        }
        DependencySignal {
            name: "html_structure".into(),
            content: Some("<main></main>".into()),
            metadata,
            coordinator_task_id: coordinator.map(str::to_string),
        }
    }

    #[test]
    fn dependency_signals_match_project_coordinator_and_page() {
        let homepage = component_task("task_c", "Homepage");
        assert!(routing::satisfies(&signal("kayak", Some("task_c"), Some("Homepage")), &homepage));
        assert!(routing::satisfies(&signal("kayak", Some("task_c"), None), &homepage));
        assert!(!routing::satisfies(&signal("kayak", Some("task_c"), Some("About")), &homepage));
        assert!(!routing::satisfies(&signal("kayak", Some("task_x"), Some("Homepage")), &homepage));
        assert!(!routing::satisfies(&signal("surfing", Some("task_c"), Some("Homepage")), &homepage));

        let mut specs = TaskRecord::new(
            TaskKind::DefineSpecifications,
            "Specify",
            TaskDetails {
                project_name: "kayak".into(),
                ..TaskDetails::default()
            },
            "specifier-01",
        );
        assert!(routing::satisfies(&signal("kayak", None, None), &specs));
        assert!(!routing::satisfies(&signal("surfing", None, None), &specs));
        assert!(!routing::satisfies(&signal("kayak", Some("task_c"), None), &specs));
        specs.details.project_name = "surfing".into();
        assert!(routing::satisfies(&signal("surfing", None, None), &specs));
    }

    #[tokio::test]
    async fn arrival_from_an_abandoned_trip_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut supervisor, _handle, _recorder) = supervisor(&dir, 100);
        let actor = "html-01";
        supervisor.begin_transition(actor, Location::HtmlDesk, Location::SaveZone);
        supervisor.begin_transition(actor, Location::SaveZone, Location::InternetZone);
        supervisor.begin_transition(actor, Location::InternetZone, Location::SaveZone);
        assert_eq!(supervisor.transit.get(actor), Some(&(3, Location::SaveZone)));

        // the first trip had the same destination but was replaced
        supervisor.on_arrival(ArrivalDue {
            actor: actor.into(),
            to: Location::SaveZone,
            trip: 1,
        });
        assert_eq!(supervisor.transit.get(actor), Some(&(3, Location::SaveZone)));

        supervisor.on_arrival(ArrivalDue {
            actor: actor.into(),
            to: Location::SaveZone,
            trip: 3,
        });
        assert!(supervisor.transit.get(actor).is_none());
    }
}
