//! Terminal presentation of a run.

use colored::*;
use crewflow::actors::ActorSnapshot;
use crewflow::core::{TaskRecord, TaskStatus};
use crewflow::supervisor::{Observer, RunOutcome, SupervisorHandle};
use crewflow::utils::truncate;
use dialoguer::{theme::ColorfulTheme, Input};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{error, warn};

/// Observer that keeps a spinner with the latest activity and asks clarification
/// questions on the terminal.
pub struct ConsoleObserver {
    spinner: ProgressBar,
    handle: OnceCell<SupervisorHandle>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        Self {
            spinner,
            handle: OnceCell::new(),
        }
    }

    /// Connects the observer to the supervisor it answers questions for.
    pub fn attach(&self, handle: SupervisorHandle) {
        if self.handle.set(handle).is_err() {
            warn!("console observer already attached");
        }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

fn colored_status(status: TaskStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        TaskStatus::Completed => text.green(),
        TaskStatus::Failed => text.red(),
        TaskStatus::WaitingUserInput => text.yellow(),
        TaskStatus::InProgress => text.cyan(),
        _ => text.normal(),
    }
}

impl Observer for ConsoleObserver {
    fn on_actor_state_changed(&self, actor_id: &str, snapshot: &ActorSnapshot) {
        self.spinner.set_message(format!(
            "{} {} | {}",
            actor_id.cyan(),
            snapshot.status,
            truncate(&snapshot.activity, 60)
        ));
    }

    fn on_task_state_changed(&self, task_id: &str, task: &TaskRecord) {
        if task.status == TaskStatus::InProgress {
            return;
        }
        self.spinner.println(format!(
            "{} {} {} [{}] {}",
            "●".blue(),
            task_id.dimmed(),
            task.kind.name(),
            task.assigned_to,
            colored_status(task.status)
        ));
    }

    fn on_user_input_needed(&self, task_id: &str, question: &str) {
        let Some(handle) = self.handle.get().cloned() else {
            error!("no supervisor attached to answer '{}'", question);
            return;
        };
        let spinner = self.spinner.clone();
        let task_id = task_id.to_string();
        let question = question.to_string();
        // the prompt blocks, keep it off the runtime
        std::thread::spawn(move || {
            let answer = spinner.suspend(|| {
                println!("{}", "\n🤔 The planner needs a clarification.".bold().yellow());
                Input::<String>::with_theme(&ColorfulTheme::default())
                    .with_prompt(question)
                    .interact_text()
            });
            match answer {
                Ok(text) => {
                    if !handle.submit_user_response(task_id, text) {
                        warn!("run finished before the answer was delivered");
                    }
                }
                Err(e) => error!("failed to read the answer: {}", e),
            }
        });
    }

    fn on_simulation_ended(&self, message: &str, success: bool) {
        let line = if success {
            format!("✅ {}", message).green()
        } else {
            format!("❌ {}", message).red()
        };
        self.spinner.println(line.to_string());
    }
}

/// Prints the task registry of a finished run.
pub fn print_summary(outcome: &RunOutcome) {
    println!(
        "\n{} after {} iterations",
        if outcome.success {
            "Run succeeded".bold().green()
        } else {
            "Run failed".bold().red()
        },
        outcome.iterations
    );
    for task in &outcome.tasks {
        println!(
            "  {} {:<22} {:<15} {}",
            task.id.dimmed(),
            task.kind.name(),
            task.assigned_to,
            colored_status(task.status)
        );
    }
    println!("{}", outcome.message);
}
