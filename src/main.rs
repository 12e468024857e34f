//! Command line entry point.
//!
//! Loads `.env` and the configuration, asks for a request if none was given, then runs the
//! crew until the project is approved, rejected for good, or the iteration bound is hit.

mod cli;
mod console;

use clap::Parser;
use colored::*;
use console::ConsoleObserver;
use crewflow::config::{load_config, SimulationConfig};
use crewflow::errors::ConfigError;
use crewflow::llm::{LlmService, Provider};
use crewflow::supervisor::Supervisor;
use crewflow::utils::init_logging;
use dialoguer::{theme::ColorfulTheme, Input};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main entry point that initializes and runs the application.
///
/// # Initialization steps:
/// 1. Parse CLI arguments
/// 2. Initialize logging system
/// 3. Load environment variables and configuration
/// 4. Build the generation service and the supervisor
/// 5. Submit the request and run to completion
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let _log_guard = init_logging(&cli.logging_level, cli.log_file);

    if let Err(e) = dotenvy::dotenv() {
        warn!("Failed to load .env file: {}", e);
    }

    let mut config = match load_simulation_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(provider) = &cli.provider {
        match provider.parse::<Provider>() {
            Ok(provider) => config.llm.provider = provider,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    if cli.model.is_some() {
        config.llm.model = cli.model.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.sandbox.root = dir.clone();
    }

    let request = match cli.request.clone().or_else(|| config.request.clone()) {
        Some(request) => request,
        None => match ask_for_request() {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to read the request: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };

    let service = LlmService::from_env(config.llm.retry_policy());
    if !service.has_provider(config.llm.provider) {
        error!(
            "{} is not set; cannot use the {} provider",
            config.llm.provider.api_key_var(),
            config.llm.provider
        );
        return ExitCode::FAILURE;
    }

    let observer = Arc::new(ConsoleObserver::new());
    let (supervisor, handle) = match Supervisor::new(config, Arc::new(service), observer.clone()) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to start the supervisor: {}", e);
            return ExitCode::FAILURE;
        }
    };
    observer.attach(handle.clone());
    handle.submit_request(request);

    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let outcome = supervisor.run().await;
    observer.finish();
    console::print_summary(&outcome);
    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Loads `--config`, else `<config dir>/crewflow/config.yaml` if present, else defaults.
fn load_simulation_config(path: Option<&str>) -> Result<SimulationConfig, ConfigError> {
    if let Some(path) = path {
        return load_config(path);
    }
    let default = dirs::config_dir().map(|dir| dir.join("crewflow").join("config.yaml"));
    match default {
        Some(path) if path.exists() => {
            info!("Using configuration from {}", path.display());
            load_config(&path.to_string_lossy())
        }
        _ => Ok(SimulationConfig::default()),
    }
}

fn ask_for_request() -> Result<String, dialoguer::Error> {
    println!("{}", "\n🤖 Welcome to crewflow!".bold().cyan());
    println!("{}", "Describe the website you would like the crew to build.".yellow());
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Request")
        .interact_text()
}
