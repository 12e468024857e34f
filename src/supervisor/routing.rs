use super::Supervisor;
use crate::core::{
    Content, DependencySignal, Envelope, PeerMessage, SupervisorRequest, TaskKind, TaskOutcome,
    TaskRecord, TaskStatus, SUPERVISOR_ID,
};
use crate::utils::truncate;
use serde_json::Value;
use tracing::{debug, error, info, warn};

impl Supervisor {
    /// Routes one envelope from an actor's outbox.
    pub(super) fn route(&mut self, envelope: Envelope) {
        if envelope.recipient == SUPERVISOR_ID {
            match envelope.content {
                Content::Request(request) => self.handle_request(&envelope.sender, request),
                other => warn!(
                    "{} sent unsupported content to the supervisor: {:?}",
                    envelope.sender, other
                ),
            }
            return;
        }

        if let Content::Peer(message) = &envelope.content {
            debug!(
                "{} -> {}: {}",
                envelope.sender,
                envelope.recipient,
                message.type_name()
            );
            self.record_dependency(&envelope.recipient, message);
        }
        self.deliver(envelope);
    }

    /// Puts `envelope` in its recipient's mailbox.
    pub(super) fn deliver(&self, envelope: Envelope) {
        match self.actors.get(&envelope.recipient) {
            Some(handle) => {
                if !handle.deliver(envelope) {
                    warn!("mailbox of {} is closed", handle.id);
                }
            }
            None => error!("no actor '{}' to deliver to", envelope.recipient),
        }
    }

    pub(super) fn handle_request(&mut self, sender: &str, request: SupervisorRequest) {
        match request {
            SupervisorRequest::TaskAccepted { task_id } => {
                self.set_status(&task_id, TaskStatus::InProgress, None);
            }
            SupervisorRequest::TaskUpdate { task_id, outcome } => {
                self.settle(&task_id, outcome);
            }
            SupervisorRequest::Delegate {
                origin_task_id,
                tasks,
            } => {
                self.delegate(origin_task_id.as_deref(), tasks);
            }
            SupervisorRequest::UseTool { task_id, call } => {
                let Some(role) = self.actors.get(sender).map(|h| h.role) else {
                    error!("tool request from unknown actor {}", sender);
                    return;
                };
                let tools = self.tools.clone();
                let reply = self.envelope_tx.clone();
                let actor = sender.to_string();
                tokio::spawn(async move {
                    let tool = call.name();
                    let outcome = tools.execute(&actor, role, &call).await;
                    let envelope = Envelope::new(
                        SUPERVISOR_ID,
                        actor,
                        Content::ToolResult {
                            task_id,
                            tool,
                            outcome,
                        },
                    );
                    // routed like any other message so it reaches the actor's mailbox
                    if reply.send(envelope).is_err() {
                        debug!("supervisor gone before {} finished", tool);
                    }
                });
            }
            SupervisorRequest::BeginTransition { from, to } => {
                self.begin_transition(sender, from, to);
            }
            SupervisorRequest::StateChanged(snapshot) => {
                self.observer.on_actor_state_changed(sender, &snapshot);
            }
            SupervisorRequest::RequestUserInput { task_id, question } => {
                if self.set_status(&task_id, TaskStatus::WaitingUserInput, None) {
                    self.observer.on_user_input_needed(&task_id, &question);
                } else {
                    warn!("cannot ask the user about task {}", task_id);
                }
            }
            SupervisorRequest::SimulationEnd { message, success } => {
                info!("simulation end reported by {}: {}", sender, message);
                if self.outcome.is_none() {
                    self.observer.on_simulation_ended(&message, success);
                    self.outcome = Some((success, message));
                }
            }
        }
    }

    /// Applies a status change if it is legal and notifies the observer.
    pub(super) fn set_status(
        &mut self,
        task_id: &str,
        next: TaskStatus,
        result: Option<String>,
    ) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            warn!("status update for unknown task {}", task_id);
            return false;
        };
        if task.status == next {
            return true;
        }
        if !task.transition(next) {
            warn!("illegal transition of {}: {} -> {}", task_id, task.status, next);
            return false;
        }
        if result.is_some() {
            task.result = result;
        }
        self.observer.on_task_state_changed(task_id, task);
        true
    }

    /// Records the final outcome reported by an actor.
    fn settle(&mut self, task_id: &str, outcome: TaskOutcome) {
        let status = match self.tasks.get(task_id) {
            Some(task) => task.status,
            None => {
                warn!("outcome for unknown task {}", task_id);
                return;
            }
        };
        if status.is_terminal() {
            debug!("task {} already {}", task_id, status);
            return;
        }
        if status != TaskStatus::InProgress {
            self.set_status(task_id, TaskStatus::InProgress, None);
        }
        match outcome {
            TaskOutcome::Completed(result) => {
                info!("task {} completed: {}", task_id, truncate(&result, 120));
                self.set_status(task_id, TaskStatus::Completed, Some(result));
            }
            TaskOutcome::Failed(reason) => {
                warn!("task {} failed: {}", task_id, reason);
                self.set_status(task_id, TaskStatus::Failed, Some(reason));
            }
        }
    }

    /// Marks the dependency a routed message satisfies on the recipient's open tasks.
    fn record_dependency(&mut self, recipient: &str, message: &PeerMessage) {
        let Some(signal) = message.dependency_signal() else {
            return;
        };
        let mut updated = Vec::new();
        for task in self.tasks.values_mut() {
            let open = task.assigned_to == recipient && !task.status.is_terminal();
            if !open || !satisfies(&signal, task) {
                continue;
            }
            let content = signal.content.clone();
            if task.mark_dependency_ready(&signal.name, content, signal.metadata.clone()) {
                debug!("task {} dependency '{}' ready", task.id, signal.name);
                updated.push(task.id.clone());
            }
        }
        for task_id in updated {
            if let Some(task) = self.tasks.get(&task_id) {
                self.observer.on_task_state_changed(&task_id, task);
            }
        }
    }
}

/// Whether `signal` is meant for `task`.
pub(super) fn satisfies(signal: &DependencySignal, task: &TaskRecord) -> bool {
    let project = signal.metadata.get("project_name").and_then(Value::as_str);
    if let Some(project) = project {
        if project != task.details.project_name {
            return false;
        }
    }
    match (&signal.coordinator_task_id, &task.kind) {
        (None, _) => true,
        (
            Some(coordinator),
            TaskKind::GenerateComponent {
                coordinator_task_id,
                page,
                ..
            },
        ) => {
            let page_matches = signal
                .metadata
                .get("page")
                .and_then(Value::as_str)
                .map_or(true, |p| p == page);
            coordinator == coordinator_task_id && page_matches
        }
        _ => false,
    }
}
