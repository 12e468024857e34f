use super::{ArtifactMemory, ArtifactRole, Delivery, InputKey, InputSpec, Role, TimeoutPolicy};
use crate::constants::{NO_MARKETING_REPORT, SPECIFICATION_OUTLINE};
use crate::core::{ActorId, PeerMessage, TaskRecord};
use std::time::Duration;

pub const MARKETING_DEPENDENCY: &str = "marketing_strategy";
pub const SPECIFICATIONS_DEPENDENCY: &str = "specifications";

/// Turns the request and the market report into page specifications.
#[derive(Debug, Clone)]
pub struct Specifier {
    dependency_timeout: Duration,
}

impl Specifier {
    pub fn new(dependency_timeout: Duration) -> Self {
        Self { dependency_timeout }
    }
}

impl ArtifactRole for Specifier {
    fn role(&self) -> Role {
        Role::Specifier
    }

    /// Waits for the market report only when the plan includes one.
    fn input(&self, task: &TaskRecord) -> Option<InputSpec> {
        task.dependencies.contains_key(MARKETING_DEPENDENCY).then(|| InputSpec {
            name: MARKETING_DEPENDENCY.to_string(),
            key: InputKey::Project(task.details.project_name.clone()),
            delivery: Delivery::Path,
            timeout: self.dependency_timeout,
            on_timeout: TimeoutPolicy::Proceed(NO_MARKETING_REPORT.to_string()),
        })
    }

    fn prompt(&self, task: &TaskRecord, memory: &ArtifactMemory) -> String {
        let report = memory.input.as_deref().unwrap_or(NO_MARKETING_REPORT);
        format!(
            "You are a Product Manager simulation agent for project '{}'.\n\
             Original request: \"{}\"\n\
             Your task: {}\n\n\
             --- MARKETING REPORT ---\n{}\n--- END MARKETING REPORT ---\n\n{}",
            task.details.project_name,
            task.details.original_request,
            task.description,
            report,
            SPECIFICATION_OUTLINE
        )
    }

    fn artifact_path(&self, task: &TaskRecord) -> Option<String> {
        Some(format!(
            "{0}/ProductManager/specs_{0}.md",
            task.details.project_name
        ))
    }

    fn notification(&self, task: &TaskRecord, memory: &ArtifactMemory) -> Option<(ActorId, PeerMessage)> {
        let path = memory.saved_path.clone()?;
        Some((
            Role::Coordinator.actor_id().to_string(),
            PeerMessage::DependencyReady {
                dependency: SPECIFICATIONS_DEPENDENCY.to_string(),
                path,
                project_name: task.details.project_name.clone(),
                originating_task_id: task.details.originating_task_id.clone(),
            },
        ))
    }

    fn summary(&self, _task: &TaskRecord, memory: &ArtifactMemory) -> String {
        format!(
            "Specifications saved to {}",
            memory.saved_path.as_deref().unwrap_or("unknown path")
        )
    }
}
