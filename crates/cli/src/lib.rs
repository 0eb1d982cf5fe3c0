pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use somnia_core::config::{LoadOptions, LogFormat, SomniaConfig};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "somnia",
    about = "Somnia agent runtime CLI",
    long_about = "Load Somnia modules, run single decision cycles, and inspect effective configuration.",
    after_help = "Examples:\n  somnia check agent.toml\n  somnia run --module agent.toml --intent '{\"name\":\"request_help\"}'\n  somnia config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a somnia.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Load a module and run one decision cycle for a JSON intent")]
    Run {
        #[arg(long, help = "Module file (.toml or .json)")]
        module: PathBuf,
        #[arg(long, help = "Intent document, e.g. '{\"name\":\"request_help\",\"facts\":{}}'")]
        intent: String,
    },
    #[command(about = "Validate a module file and print its summary")]
    Check {
        #[arg(help = "Module file (.toml or .json)")]
        module: PathBuf,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

/// Install the global fmt subscriber on stderr so stdout stays machine-readable.
pub fn init_logging(config: &SomniaConfig) -> Result<()> {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Config errors are reported by the command itself; logging just falls back to defaults.
    let logging_config =
        SomniaConfig::load(LoadOptions { config_path: cli.config.clone(), ..LoadOptions::default() })
            .unwrap_or_default();
    if let Err(error) = init_logging(&logging_config) {
        eprintln!("{error}");
    }

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Command::Run { module, intent } => commands::run::run(&module, &intent, config_path),
        Command::Check { module } => commands::check::run(&module),
        Command::Config => commands::config::run(config_path),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
