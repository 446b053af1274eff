//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter pipeline file
    Init {
        /// Where to write the pipeline
        #[arg(default_value = "gantry.yaml")]
        path: String,
    },

    /// Validate a pipeline's job graph
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: String,
    },

    /// Show which jobs an event would run, wave by wave
    Plan {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: String,

        /// Trigger event: push, pull_request, schedule, release
        #[arg(short, long, default_value = "push")]
        event: String,

        /// Release tag, for release events
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Run a pipeline locally
    Run {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: String,

        /// Trigger event: push, pull_request, schedule, release
        #[arg(short, long, default_value = "push")]
        event: String,

        /// Release tag, for release events
        #[arg(short, long)]
        tag: Option<String>,

        /// Print the finished invocation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the JSON schema of the pipeline format
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print where the configuration file is looked up
    Path,
}
