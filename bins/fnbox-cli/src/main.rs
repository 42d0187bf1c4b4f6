mod commands;
mod generator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fnbox_common::types::{ExecutionStatus, Isolation};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "fnbox-cli")]
#[command(about = "fnbox CLI - Scaffold runtimes, build images, and run functions locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write config/languages.json and a Dockerfile per language
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Build Docker image for a language
    BuildImage {
        /// Language name
        #[arg(short, long)]
        name: String,

        /// Skip build cache
        #[arg(long, default_value = "false")]
        no_cache: bool,
    },

    /// Run a source file once and print the result as JSON
    Run {
        /// Language tag (e.g., python, javascript)
        #[arg(short, long)]
        language: String,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Timeout in seconds, clamped to 1..=30
        #[arg(short, long, default_value = "5")]
        timeout: u32,

        /// process or container; defaults to the language's own setting
        #[arg(short, long)]
        isolation: Option<Isolation>,

        /// Language configuration file
        #[arg(long, default_value = "config/languages.json")]
        languages: PathBuf,
    },
}

fn init_tracing() {
    // Logs go to stderr so stdout stays pure JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Init { path } => {
            commands::init_project(&path)?;
        }
        Commands::BuildImage { name, no_cache } => {
            commands::build_docker_image(&name, no_cache)?;
        }
        Commands::Run {
            language,
            file,
            timeout,
            isolation,
            languages,
        } => {
            let result =
                commands::run_function(&languages, &language, &file, timeout, isolation).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            if result.status == ExecutionStatus::InfrastructureError {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parses_isolation() {
        let cli = Cli::try_parse_from([
            "fnbox-cli", "run", "-l", "python", "-f", "main.py", "--isolation", "docker",
        ])
        .unwrap();
        let Commands::Run { isolation, timeout, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(isolation, Some(Isolation::Container));
        assert_eq!(timeout, 5);
    }

    #[test]
    fn test_run_rejects_unknown_isolation() {
        let err = Cli::try_parse_from([
            "fnbox-cli", "run", "-l", "python", "-f", "main.py", "-i", "vm",
        ])
        .err()
        .unwrap();
        assert!(err.to_string().contains("unknown isolation 'vm'"));
    }
}
