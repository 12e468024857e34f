use crate::actors::ActorSnapshot;
use crate::core::TaskRecord;
use tracing::{info, warn};

/// Read-only view of the run for presentation layers.
///
/// Callbacks run on the supervisor loop and must return quickly.
pub trait Observer: Send + Sync {
    fn on_actor_state_changed(&self, actor_id: &str, snapshot: &ActorSnapshot);
    fn on_task_state_changed(&self, task_id: &str, task: &TaskRecord);
    fn on_user_input_needed(&self, task_id: &str, question: &str);
    fn on_simulation_ended(&self, message: &str, success: bool);
}

/// Observer that only writes log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_actor_state_changed(&self, actor_id: &str, snapshot: &ActorSnapshot) {
        tracing::debug!(
            "[{}] {} at {} ({})",
            actor_id,
            snapshot.status,
            snapshot.location,
            snapshot.activity
        );
    }

    fn on_task_state_changed(&self, task_id: &str, task: &TaskRecord) {
        info!(
            "task {} ({}) -> {} [{}]",
            task_id,
            task.kind.name(),
            task.status,
            task.assigned_to
        );
    }

    fn on_user_input_needed(&self, task_id: &str, question: &str) {
        warn!("task {} needs user input: {}", task_id, question);
    }

    fn on_simulation_ended(&self, message: &str, success: bool) {
        if success {
            info!("simulation finished: {}", message);
        } else {
            warn!("simulation ended without success: {}", message);
        }
    }
}
