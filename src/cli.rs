use clap::Parser;

/// Command line interface for the application
#[derive(Parser, Debug)]
#[command(
    name = "crewflow",
    version,
    about = "Multi-actor LLM workflow that turns one request into a reviewed website"
)]
pub struct Cli {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// The project request, e.g. "Build a 2-page site about kayaking".
    /// Prompted for interactively when neither this flag nor the config provide one
    #[arg(short, long)]
    pub request: Option<String>,

    /// Generation provider: openai, anthropic or gemini
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name passed to the provider
    #[arg(long)]
    pub model: Option<String>,

    /// Sandbox root every artifact is written under
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Sets the logging verbosity level for the application
    /// Possible values: "error", "warn", "info", "debug", "trace"
    #[arg(long, default_value_t = String::from("info"))]
    pub logging_level: String,

    /// Also write logs to logs/crewflow.log
    #[arg(long, default_value_t = false)]
    pub log_file: bool,
}
