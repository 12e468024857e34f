use super::{ArtifactMemory, ArtifactRole, InputSpec, Role, MARKETING_DEPENDENCY};
use crate::constants::MARKETING_REPORT_OUTLINE;
use crate::core::{ActorId, PeerMessage, TaskRecord};

/// Researches the request and writes the market report the specifier builds on.
#[derive(Debug, Clone)]
pub struct Marketer {
    search_enabled: bool,
}

impl Marketer {
    pub fn new(search_enabled: bool) -> Self {
        Self { search_enabled }
    }
}

impl ArtifactRole for Marketer {
    fn role(&self) -> Role {
        Role::Marketer
    }

    fn input(&self, _task: &TaskRecord) -> Option<InputSpec> {
        None
    }

    fn research_query(&self, task: &TaskRecord) -> Option<String> {
        self.search_enabled
            .then(|| format!("{} market audience trends", task.details.original_request))
    }

    fn prompt(&self, task: &TaskRecord, memory: &ArtifactMemory) -> String {
        let research = match &memory.research {
            Some(results) => format!("\n--- WEB SEARCH RESULTS ---\n{}\n--- END RESULTS ---\n", results),
            None => String::new(),
        };
        format!(
            "You are a Marketer simulation agent for project '{}'.\n\
             Original request: \"{}\"\n\
             Your task: {}\n{}\n{}",
            task.details.project_name,
            task.details.original_request,
            task.description,
            research,
            MARKETING_REPORT_OUTLINE
        )
    }

    fn artifact_path(&self, task: &TaskRecord) -> Option<String> {
        let suffix = task.id.trim_start_matches("task_");
        Some(format!(
            "{}/Marketer/marketing_report_{}.md",
            task.details.project_name, suffix
        ))
    }

    fn notification(&self, task: &TaskRecord, memory: &ArtifactMemory) -> Option<(ActorId, PeerMessage)> {
        let path = memory.saved_path.clone()?;
        Some((
            Role::Specifier.actor_id().to_string(),
            PeerMessage::DependencyReady {
                dependency: MARKETING_DEPENDENCY.to_string(),
                path,
                project_name: task.details.project_name.clone(),
                originating_task_id: task.details.originating_task_id.clone(),
            },
        ))
    }

    fn summary(&self, _task: &TaskRecord, memory: &ArtifactMemory) -> String {
        format!(
            "Marketing report saved to {}",
            memory.saved_path.as_deref().unwrap_or("unknown path")
        )
    }
}
