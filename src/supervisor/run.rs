use super::{Inbound, RunOutcome, Supervisor};
use crate::actors::Role;
use crate::core::{
    project_name, Content, Delegation, Envelope, SupervisorRequest, TaskDetails, TaskKind,
    TaskStatus,
};
use std::time::Duration;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

impl Supervisor {
    /// Runs the simulation until it ends, is stopped, or hits the iteration bound.
    ///
    /// # Details
    ///
    /// - Starts every actor
    /// - Routes actor messages, tool results and travel arrivals as they come
    /// - Handles requests and answers from the external boundary
    /// - Counts one iteration per `run_tick`; reaching `max_iterations` ends the run
    ///   without success
    pub async fn run(mut self) -> RunOutcome {
        for handle in self.actors.values_mut() {
            handle.start();
        }
        info!("supervisor running {} actors", self.actors.len());

        let mut ticker = tokio::time::interval(self.config.runtime.run_tick);
        let mut inbound_open = true;
        loop {
            tokio::select! {
                Some(envelope) = self.envelope_rx.recv() => self.route(envelope),
                Some(due) = self.timer_rx.recv() => self.on_arrival(due),
                inbound = self.inbound_rx.recv(), if inbound_open => match inbound {
                    Some(message) => {
                        if !self.handle_inbound(message) {
                            self.outcome.get_or_insert((false, "Stopped".to_string()));
                        }
                    }
                    None => inbound_open = false,
                },
                _ = ticker.tick() => {
                    self.iterations += 1;
                    if self.iterations >= self.config.runtime.max_iterations && self.outcome.is_none() {
                        let message = format!(
                            "Maximum iterations ({}) reached",
                            self.config.runtime.max_iterations
                        );
                        warn!("{}", message);
                        self.observer.on_simulation_ended(&message, false);
                        self.outcome = Some((false, message));
                    }
                }
            }
            if self.outcome.is_some() {
                break;
            }
        }

        self.shutdown().await;
        let (success, message) = self
            .outcome
            .take()
            .unwrap_or_else(|| (false, "Run ended without outcome".to_string()));
        let mut tasks: Vec<_> = std::mem::take(&mut self.tasks).into_values().collect();
        tasks.sort_by_key(|t| t.created_at);
        RunOutcome {
            success,
            message,
            iterations: self.iterations,
            tasks,
        }
    }

    /// Handles one inbound message. Returns `false` when the run must stop.
    pub(super) fn handle_inbound(&mut self, message: Inbound) -> bool {
        match message {
            Inbound::SubmitRequest(request) => {
                self.start_project(request);
                true
            }
            Inbound::SubmitUserResponse { task_id, text } => {
                let waiting = self
                    .tasks
                    .get(&task_id)
                    .is_some_and(|t| t.status == TaskStatus::WaitingUserInput);
                if !waiting {
                    warn!("task {} is not waiting for user input", task_id);
                    return true;
                }
                self.set_status(&task_id, TaskStatus::InProgress, None);
                match self.directory.resolve(Role::Relay) {
                    Ok(relay) => {
                        let relay = relay.clone();
                        self.deliver(Envelope::control(
                            relay,
                            Content::UserResponse { task_id, text },
                        ));
                    }
                    Err(e) => error!("cannot forward user response: {}", e),
                }
                true
            }
            Inbound::Stop => {
                info!("stop requested");
                false
            }
        }
    }

    /// Seeds the relay task for a new request. One project per run.
    fn start_project(&mut self, request: String) {
        let request = request.trim().to_string();
        if request.is_empty() {
            warn!("ignoring empty request");
            return;
        }
        if let Some(project) = &self.project {
            warn!("project '{}' already running, ignoring new request", project);
            return;
        }
        let relay = match self.directory.resolve(Role::Relay) {
            Ok(relay) => relay.clone(),
            Err(e) => {
                error!("cannot start project: {}", e);
                return;
            }
        };
        let project = project_name(&request);
        info!("starting project '{}'", project);
        self.project = Some(project.clone());
        self.delegate(
            None,
            vec![Delegation {
                target: relay,
                kind: TaskKind::RelayRequest {
                    request: request.clone(),
                },
                description: format!("Relay user request: {}", request),
                details: TaskDetails {
                    original_request: request,
                    project_name: project,
                    ..TaskDetails::default()
                },
                dependencies: Vec::new(),
            }],
        );
    }

    /// Stops every actor and waits briefly for them to exit.
    async fn shutdown(&mut self) {
        info!("shutting down actors");
        for handle in self.actors.values() {
            handle.stop();
        }
        for handle in self.actors.values_mut() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle.join()).await.is_err() {
                warn!("{} did not stop within {:?}", handle.id, SHUTDOWN_GRACE);
            }
        }
        // settle outcomes reported while stopping
        while let Ok(envelope) = self.envelope_rx.try_recv() {
            if let Content::Request(
                request @ (SupervisorRequest::TaskAccepted { .. } | SupervisorRequest::TaskUpdate { .. }),
            ) = envelope.content
            {
                self.handle_request(&envelope.sender, request);
            }
        }
    }
}
