use super::Supervisor;
use crate::core::{Delegation, TaskRecord, TaskStatus};
use crate::errors::ActorError;
use tracing::{error, info};

impl Supervisor {
    /// Creates one task record per delegation and hands each to its actor.
    ///
    /// # Arguments
    /// * `origin_task_id` - Task that asked for the delegation, recorded as parent
    /// * `delegations` - Tasks to create
    pub(super) fn delegate(&mut self, origin_task_id: Option<&str>, delegations: Vec<Delegation>) {
        for delegation in delegations {
            let mut record = TaskRecord::new(
                delegation.kind,
                delegation.description,
                delegation.details,
                delegation.target,
            );
            for dependency in delegation.dependencies {
                record.add_dependency(dependency);
            }
            let task_id = record.id.clone();

            if let Some(parent) = origin_task_id.and_then(|id| self.tasks.get_mut(id)) {
                parent.child_tasks.push(task_id.clone());
            }

            if !self.actors.contains_key(&record.assigned_to) {
                let reason = ActorError::TaskAssignment(record.assigned_to.clone()).to_string();
                error!("cannot delegate {}: {}", task_id, reason);
                record.transition(TaskStatus::InProgress);
                record.transition(TaskStatus::Failed);
                record.result = Some(reason);
                self.observer.on_task_state_changed(&task_id, &record);
                self.tasks.insert(task_id, record);
                continue;
            }

            info!(
                "task {} ({}) -> {}",
                task_id,
                record.kind.name(),
                record.assigned_to
            );
            self.observer.on_task_state_changed(&task_id, &record);
            if let Some(handle) = self.actors.get(&record.assigned_to) {
                if !handle.assign(record.clone()) {
                    error!("mailbox of {} is closed, {} not delivered", handle.id, task_id);
                }
            }
            self.tasks.insert(task_id, record);
        }
    }
}
