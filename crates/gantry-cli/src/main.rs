//! Gantry CLI entrypoint.

use clap::{Parser, ValueEnum};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod handlers;


use commands::{Commands, ConfigCommands};
use config::EngineConfig;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry job-graph engine", long_about = None)]
struct Cli {
    /// Engine configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (text, json) = match format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", style("✗").red());
            return ExitCode::from(handlers::EXIT_INVALID);
        }
    };

    let result = match cli.command {
        Commands::Init { path } => handlers::init(&path).await,
        Commands::Validate { path } => handlers::validate(&path),
        Commands::Plan { path, event, tag } => handlers::plan(&path, &event, tag),
        Commands::Run {
            path,
            event,
            tag,
            json,
        } => handlers::run(&config, &path, &event, tag, json).await,
        Commands::Schema => handlers::schema(),
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config),
            ConfigCommands::Path => handlers::config_path(cli.config.as_deref()),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", style("✗").red());
            ExitCode::from(handlers::EXIT_FAILURE)
        }
    }
}
