pub mod bootstrap;
pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use triage_core::config::{AppConfig, LoadOptions, LoggingConfig};

#[derive(Debug, Parser)]
#[command(
    name = "triage",
    about = "Clinic call-center router CLI",
    long_about = "Chat with the appointment router, prepare its database, and inspect configuration and readiness.",
    after_help = "Examples:\n  triage migrate\n  triage seed\n  triage chat\n  triage chat --message \"I need to cancel my appointment\"\n  triage doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Talk to the router; reads one user message per line from stdin")]
    Chat {
        #[arg(long, help = "Send a single message and print the outcome as JSON")]
        message: Option<String>,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo clinic directory (doctors and patients)")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Validate config, model client readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let logging = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging)
        .unwrap_or_else(|_| LoggingConfig { level: "warn".to_string(), ..AppConfig::default().logging });
    logging::init_logging(&logging);

    let result = match cli.command {
        Command::Chat { message } => commands::chat::run(message),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
