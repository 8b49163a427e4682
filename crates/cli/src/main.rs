//! TaskPilot CLI — the main entry point.
//!
//! Commands:
//! - `run`       — Execute an objective, streaming progress as JSON lines
//! - `classify`  — Show the recovery strategy for an error message
//! - `config`    — Print the default configuration or validate a file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskpilot",
    about = "TaskPilot — agentic task execution over capability services",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an objective to completion
    Run {
        /// What to accomplish
        #[arg(short, long)]
        objective: String,

        /// User whose credentials are used for capability services
        #[arg(short, long, env = "TASKPILOT_USER", default_value = "local")]
        user: String,

        /// Config file (defaults to ~/.taskpilot/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Classify a failure message into a recovery strategy
    Classify {
        /// The error text
        #[arg(short, long)]
        error: String,

        /// How many times the action has failed so far
        #[arg(short, long, default_value_t = 1)]
        attempt: u32,

        /// Attempt count at which retrying stops
        #[arg(long, default_value_t = 2)]
        max_retries: u32,
    },

    /// Print the default configuration, or validate a config file
    Config {
        /// Validate this file instead of printing defaults
        #[arg(long)]
        validate: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the event stream
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { objective, user, config } => commands::run::run(objective, user, config).await?,
        Commands::Classify {
            error,
            attempt,
            max_retries,
        } => commands::classify::run(&error, attempt, max_retries),
        Commands::Config { validate } => commands::config_cmd::run(validate)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_requires_objective() {
        assert!(Cli::try_parse_from(["taskpilot", "run"]).is_err());
        let cli = Cli::try_parse_from(["taskpilot", "run", "-o", "fetch the price", "-u", "alice"]).unwrap();
        match cli.command {
            Commands::Run { objective, user, config } => {
                assert_eq!(objective, "fetch the price");
                assert_eq!(user, "alice");
                assert!(config.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn classify_defaults_to_first_attempt() {
        let cli = Cli::try_parse_from(["taskpilot", "classify", "--error", "HTTP 503"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Classify {
                attempt: 1,
                max_retries: 2,
                ..
            }
        ));
    }
}
