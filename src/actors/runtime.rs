use super::{Action, ActorSnapshot, ActorStatus, DecisionContext, Role, RoleBehavior};
use crate::core::{
    ActorId, Content, Envelope, Location, SupervisorRequest, TaskOutcome, TaskRecord, SUPERVISOR_ID,
};
use crate::errors::{ActorError, GenerationError, ToolError};
use crate::llm::{GenerationService, Provider};
use crate::tools::{ToolCall, ToolName, ToolOutcome};
use crate::utils::truncate;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-actor runtime settings.
#[derive(Debug, Clone)]
pub struct ActorSettings {
    pub provider: Provider,
    pub model: Option<String>,
    /// Cooperative pause between two cycles
    pub tick: Duration,
    pub tool_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: None,
            tick: Duration::from_millis(100),
            tool_timeout: Duration::from_secs(60),
            generation_timeout: Duration::from_secs(120),
        }
    }
}

struct ActiveTask<M> {
    record: TaskRecord,
    memory: M,
}

/// A tool call the actor is blocked on.
#[derive(Debug, Clone, Copy)]
struct PendingTool {
    tool: ToolName,
    deadline: Instant,
}

/// Generic actor engine: mailbox, status machine and the decide/act cycle.
pub struct Actor<B: RoleBehavior> {
    id: ActorId,
    behavior: B,
    status: ActorStatus,
    location: Location,
    target: Option<Location>,
    last_error: Option<String>,
    activity: String,
    current: Option<ActiveTask<B::Memory>>,
    pending_tool: Option<PendingTool>,
    mailbox: UnboundedReceiver<Envelope>,
    outbox: UnboundedSender<Envelope>,
    generation: Arc<dyn GenerationService>,
    settings: ActorSettings,
    stop: watch::Receiver<bool>,
}

impl<B: RoleBehavior> Actor<B> {
    /// Creates the engine and the sender side of its mailbox.
    ///
    /// # Arguments
    /// * `id` - Actor id used for routing
    /// * `behavior` - Role behavior
    /// * `outbox` - Channel to the supervisor router
    /// * `generation` - Shared generation service
    /// * `settings` - Tick and timeouts
    /// * `stop` - Stop signal
    pub fn new(
        id: impl Into<ActorId>,
        behavior: B,
        outbox: UnboundedSender<Envelope>,
        generation: Arc<dyn GenerationService>,
        settings: ActorSettings,
        stop: watch::Receiver<bool>,
    ) -> (Self, UnboundedSender<Envelope>) {
        let (tx, mailbox) = unbounded_channel();
        let location = behavior.role().home();
        let actor = Self {
            id: id.into(),
            behavior,
            status: ActorStatus::Idle,
            location,
            target: None,
            last_error: None,
            activity: "idle".to_string(),
            current: None,
            pending_tool: None,
            mailbox,
            outbox,
            generation,
            settings,
            stop,
        };
        (actor, tx)
    }

    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            id: self.id.clone(),
            role: self.behavior.role(),
            status: self.status,
            current_task_id: self.current.as_ref().map(|t| t.record.id.clone()),
            location: self.location,
            target: self.target,
            last_error: self.last_error.clone(),
            activity: self.activity.clone(),
        }
    }

    /// Runs the decide/act cycle until stopped.
    pub async fn run(mut self) {
        info!("{} ({}) started at {}", self.id, self.behavior.role(), self.location);
        self.publish();
        loop {
            if *self.stop.borrow() {
                break;
            }

            match self.mailbox.try_recv() {
                Ok(envelope) => {
                    if !self.dispatch(envelope).await {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }

            self.check_tool_deadline();

            if self.ready_to_decide() {
                self.cycle().await;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.tick) => {}
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("{} stopped", self.id);
    }

    fn ready_to_decide(&self) -> bool {
        self.current.is_some() && self.status == ActorStatus::Working && self.pending_tool.is_none()
    }

    /// Handles one mailbox message. Returns `false` when the actor must stop.
    async fn dispatch(&mut self, envelope: Envelope) -> bool {
        let Envelope { sender, content, .. } = envelope;
        let result = match content {
            Content::NewTask(record) => {
                self.assign(record);
                Ok(())
            }
            Content::ToolResult {
                task_id,
                tool,
                outcome,
            } => self.handle_tool_result(&task_id, tool, outcome),
            Content::Arrived(location) => {
                self.arrive(location);
                Ok(())
            }
            Content::UserResponse { task_id, text } => {
                match self.behavior.on_user_response(&task_id, text) {
                    Ok(actions) => self.execute_all(actions).await,
                    Err(e) => Err(e),
                }
            }
            Content::Stop => return false,
            Content::Peer(message) => {
                debug!("{} <- {}: {}", self.id, sender, message.type_name());
                let active = self
                    .current
                    .as_mut()
                    .map(|t| (&t.record, &mut t.memory));
                match self.behavior.on_peer_message(&sender, message, active) {
                    Ok(actions) => self.execute_all(actions).await,
                    Err(e) => Err(e),
                }
            }
            Content::Request(_) => {
                warn!("{} received a supervisor request from {}, ignoring", self.id, sender);
                Ok(())
            }
        };
        if let Err(e) = result {
            self.fail_current(e);
        }
        true
    }

    /// Takes a new task. An active task is overwritten and reported as failed.
    fn assign(&mut self, record: TaskRecord) {
        let active_id = self.current.as_ref().map(|t| t.record.id.clone());
        if let Some(old_id) = active_id {
            if old_id == record.id {
                debug!("{} already works on {}", self.id, record.id);
                return;
            }
            warn!("{} overwrites active task {} with {}", self.id, old_id, record.id);
            self.current = None;
            self.request(SupervisorRequest::TaskUpdate {
                task_id: old_id,
                outcome: TaskOutcome::Failed(format!("Overwritten by task {}", record.id)),
            });
        }

        info!(
            "{} assigned {} ({}): {}",
            self.id,
            record.id,
            record.kind.name(),
            truncate(&record.description, 80)
        );
        self.pending_tool = None;
        self.request(SupervisorRequest::TaskAccepted {
            task_id: record.id.clone(),
        });

        match self.behavior.start_task(&record, Instant::now()) {
            Ok(memory) => {
                self.activity = format!("accepted {}", record.kind.name());
                self.current = Some(ActiveTask { record, memory });
                if self.status != ActorStatus::Transitioning {
                    self.status = ActorStatus::Working;
                }
                self.publish();
            }
            Err(e) => {
                self.status = ActorStatus::Failed;
                self.last_error = Some(e.to_string());
                self.request(SupervisorRequest::TaskUpdate {
                    task_id: record.id.clone(),
                    outcome: TaskOutcome::Failed(e.to_string()),
                });
                self.publish();
                self.status = ActorStatus::Idle;
                self.publish();
            }
        }
    }

    /// One decide/act step for the current task.
    async fn cycle(&mut self) {
        let ctx = DecisionContext {
            now: Instant::now(),
            location: self.location,
        };
        let decision = match self.current.as_mut() {
            Some(active) => self
                .behavior
                .decide(&ctx, &active.record, &mut active.memory),
            None => return,
        };
        let result = match decision {
            Ok(action) => self.execute(action).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.fail_current(e);
        }
    }

    async fn execute_all(&mut self, actions: Vec<Action>) -> Result<(), ActorError> {
        for action in actions {
            self.execute(action).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, action: Action) -> Result<(), ActorError> {
        match action {
            Action::Wait => Ok(()),
            Action::Generate => self.generate().await,
            Action::UseTool(call) => self.use_tool(call),
            Action::TransitionTo(location) => {
                self.begin_transition(location);
                Ok(())
            }
            Action::Send { to, message } => {
                debug!("{} -> {}: {}", self.id, to, message.type_name());
                self.activity = format!("sent {} to {}", message.type_name(), to);
                self.send(Envelope::new(self.id.clone(), to, Content::Peer(message)));
                Ok(())
            }
            Action::Request(request) => {
                self.request(request);
                Ok(())
            }
            Action::Complete(result) => {
                self.finish(TaskOutcome::Completed(result));
                Ok(())
            }
            Action::Fail(reason) => {
                self.finish(TaskOutcome::Failed(reason));
                Ok(())
            }
        }
    }

    /// Calls the generation service and hands the answer to the behavior.
    async fn generate(&mut self) -> Result<(), ActorError> {
        let prompt = match &self.current {
            Some(active) => self.behavior.build_prompt(&active.record, &active.memory)?,
            None => return Err(ActorError::NoActiveTask),
        };
        debug!("{} prompt ({} chars)", self.id, prompt.len());
        self.status = ActorStatus::WaitingResponse;
        self.activity = "waiting for generation".to_string();
        self.publish();

        let generation = self.generation.clone();
        let provider = self.settings.provider;
        let model = self.settings.model.clone();
        let timeout = self.settings.generation_timeout;
        let call = generation.generate(provider, &prompt, model.as_deref());

        let response = tokio::select! {
            res = tokio::time::timeout(timeout, call) => match res {
                Ok(inner) => inner,
                Err(_) => Err(GenerationError::Timeout(timeout)),
            },
            _ = self.stop.changed() => {
                info!("{} stopped while waiting for generation", self.id);
                return Ok(());
            }
        };

        if self.status == ActorStatus::WaitingResponse {
            self.status = ActorStatus::Working;
        }
        let Some(active) = self.current.as_mut() else {
            return Err(ActorError::NoActiveTask);
        };
        match response {
            Ok(text) => {
                info!("{} received {} chars from {}", self.id, text.len(), provider);
                self.activity = "generated content".to_string();
                self.behavior
                    .on_generation_result(&active.record, &mut active.memory, text)?;
            }
            Err(e) => {
                warn!("{} generation failed: {}", self.id, e);
                self.activity = "generation failed".to_string();
                self.behavior
                    .on_generation_error(&active.record, &mut active.memory, e)?;
            }
        }
        self.publish();
        Ok(())
    }

    /// Asks the supervisor to run `call`, travelling to the tool's location first.
    fn use_tool(&mut self, call: ToolCall) -> Result<(), ActorError> {
        let name = call.name();
        let role = self.behavior.role();
        if !role.tools().contains(&name) {
            return Err(ActorError::Tool(
                ToolError::NotPermitted {
                    tool: name.to_string(),
                    role: role.to_string(),
                }
                .to_string(),
            ));
        }
        if self.location != name.location() {
            debug!("{} must go to {} to use {}", self.id, name.location(), name);
            self.begin_transition(name.location());
            return Ok(());
        }
        let Some(active) = &self.current else {
            return Err(ActorError::NoActiveTask);
        };
        let task_id = active.record.id.clone();
        self.pending_tool = Some(PendingTool {
            tool: name,
            deadline: Instant::now() + self.settings.tool_timeout,
        });
        self.status = ActorStatus::UsingTool;
        self.activity = format!("using {}", name);
        self.request(SupervisorRequest::UseTool { task_id, call });
        self.publish();
        Ok(())
    }

    fn handle_tool_result(
        &mut self,
        task_id: &str,
        tool: ToolName,
        outcome: ToolOutcome,
    ) -> Result<(), ActorError> {
        let matches_task = self
            .current
            .as_ref()
            .is_some_and(|t| t.record.id == task_id);
        let matches_call = self.pending_tool.is_some_and(|p| p.tool == tool);
        if !matches_task || !matches_call {
            debug!("{} ignores stale {} result for {}", self.id, tool, task_id);
            return Ok(());
        }
        self.pending_tool = None;
        if self.status == ActorStatus::UsingTool {
            self.status = ActorStatus::Working;
        }
        self.activity = format!(
            "{} {}",
            tool,
            if outcome.is_success() { "succeeded" } else { "failed" }
        );
        let result = match self.current.as_mut() {
            Some(active) => {
                self.behavior
                    .on_tool_result(&active.record, &mut active.memory, tool, outcome)
            }
            None => Ok(()),
        };
        self.publish();
        result
    }

    /// Gives up on a tool call the supervisor never answered.
    fn check_tool_deadline(&mut self) {
        let Some(pending) = self.pending_tool else {
            return;
        };
        if Instant::now() < pending.deadline {
            return;
        }
        warn!("{} timed out waiting for {}", self.id, pending.tool);
        self.pending_tool = None;
        if self.status == ActorStatus::UsingTool {
            self.status = ActorStatus::Working;
        }
        let outcome = ToolOutcome::error(&ToolError::Timeout {
            tool: pending.tool.to_string(),
            waited: self.settings.tool_timeout,
        });
        let result = match self.current.as_mut() {
            Some(active) => self.behavior.on_tool_result(
                &active.record,
                &mut active.memory,
                pending.tool,
                outcome,
            ),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.fail_current(e);
        }
    }

    fn begin_transition(&mut self, to: Location) {
        if self.location == to && self.target.is_none() {
            return;
        }
        info!("{} heading from {} to {}", self.id, self.location, to);
        self.target = Some(to);
        self.status = ActorStatus::Transitioning;
        self.activity = format!("walking to {}", to);
        self.request(SupervisorRequest::BeginTransition {
            from: self.location,
            to,
        });
        self.publish();
    }

    fn arrive(&mut self, location: Location) {
        if self.target != Some(location) {
            debug!("{} ignores stale arrival at {}", self.id, location);
            return;
        }
        debug!("{} arrived at {}", self.id, location);
        self.location = location;
        self.target = None;
        self.status = if self.current.is_some() {
            ActorStatus::Working
        } else {
            ActorStatus::Idle
        };
        self.activity = format!("arrived at {}", location);
        self.publish();
    }

    fn fail_current(&mut self, err: ActorError) {
        error!("{} failed: {}", self.id, err);
        if self.current.is_none() {
            self.last_error = Some(err.to_string());
            return;
        }
        self.finish(TaskOutcome::Failed(err.to_string()));
    }

    /// Reports the task outcome, drops its working memory and goes back to idle.
    fn finish(&mut self, outcome: TaskOutcome) {
        let Some(active) = self.current.take() else {
            warn!("{} has no task to finish", self.id);
            return;
        };
        self.pending_tool = None;
        match &outcome {
            TaskOutcome::Completed(result) => {
                info!("{} completed {}: {}", self.id, active.record.id, truncate(result, 120));
                self.activity = format!("completed {}", active.record.kind.name());
            }
            TaskOutcome::Failed(reason) => {
                self.status = ActorStatus::Failed;
                self.last_error = Some(reason.clone());
                self.activity = format!("failed {}", active.record.kind.name());
                self.publish_for(Some(active.record.id.clone()));
            }
        }
        self.request(SupervisorRequest::TaskUpdate {
            task_id: active.record.id,
            outcome,
        });
        self.status = ActorStatus::Idle;
        self.publish();
    }

    fn request(&self, request: SupervisorRequest) {
        self.send(Envelope::new(
            self.id.clone(),
            SUPERVISOR_ID,
            Content::Request(request),
        ));
    }

    fn send(&self, envelope: Envelope) {
        if self.outbox.send(envelope).is_err() {
            debug!("{} outbox closed", self.id);
        }
    }

    fn publish(&self) {
        self.request(SupervisorRequest::StateChanged(self.snapshot()));
    }

    /// Publishes a snapshot that still names `task_id`, used for the failed state.
    fn publish_for(&self, task_id: Option<String>) {
        let mut snapshot = self.snapshot();
        snapshot.current_task_id = task_id;
        self.request(SupervisorRequest::StateChanged(snapshot));
    }
}

type Launch = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Type-erased handle the supervisor keeps per actor.
pub struct ActorHandle {
    pub id: ActorId,
    pub role: Role,
    tx: UnboundedSender<Envelope>,
    stop_tx: watch::Sender<bool>,
    launch: Option<Launch>,
    join: Option<JoinHandle<()>>,
}

impl ActorHandle {
    /// Builds the actor without starting it. Messages sent before [`start`](Self::start)
    /// wait in the mailbox.
    pub fn new<B: RoleBehavior>(
        id: impl Into<ActorId>,
        behavior: B,
        outbox: UnboundedSender<Envelope>,
        generation: Arc<dyn GenerationService>,
        settings: ActorSettings,
    ) -> Self {
        let id = id.into();
        let role = behavior.role();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (actor, tx) = Actor::new(id.clone(), behavior, outbox, generation, settings, stop_rx);
        Self {
            id,
            role,
            tx,
            stop_tx,
            launch: Some(Box::pin(actor.run())),
            join: None,
        }
    }

    /// Queues a new-task message.
    pub fn assign(&self, task: TaskRecord) -> bool {
        self.deliver(Envelope::control(self.id.clone(), Content::NewTask(task)))
    }

    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.tx.send(envelope).is_ok()
    }

    /// Spawns the actor loop. Calling it again has no effect.
    pub fn start(&mut self) {
        if let Some(launch) = self.launch.take() {
            self.join = Some(tokio::spawn(launch));
        }
    }

    /// Signals the actor to stop. Idempotent.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Waits for the actor loop to exit.
    pub async fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!("{} terminated abnormally: {}", self.id, e);
            }
        }
    }
}
