//! RTG Refit operator CLI
//!
//! Inspect the demo project, the local snapshot cache and the effective
//! configuration without a remote backend.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rtgrefit_logging::{init_logging, LogConfig};
use rtgrefit_sync::SyncConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "rtgrefit", about = "RTG refurbishment tracking tools")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.rtgrefit/config.toml)
    #[arg(long, global = true, env = "RTGREFIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Per-unit progress of the demo project
    Summary {
        /// Dataset seed (default from config)
        #[arg(long)]
        seed: Option<u64>,

        /// Number of units (default from config)
        #[arg(long)]
        units: Option<usize>,

        /// Show the zones of one unit instead
        #[arg(long)]
        unit: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List cached snapshots
    Cache {
        /// Project scope (default: every cached scope)
        #[arg(long)]
        scope: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn wants_json(&self) -> bool {
        match self {
            Commands::Summary { json, .. }
            | Commands::Cache { json, .. }
            | Commands::Config { json } => *json,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.command.wants_json();

    let config = match SyncConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            cli::print_error(&err, json_mode);
            return ExitCode::from(2);
        }
    };

    let logging = LogConfig::new("rtgrefit", config.logs_dir()).verbose(cli.verbose);
    if let Err(err) = init_logging(&logging) {
        eprintln!("Warning: logging disabled: {:#}", err);
    }
    debug!("Effective home: {}", config.home.display());

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            cli::print_error(&err, json_mode);
            ExitCode::from(1)
        }
    }
}

fn run_command(command: Commands, config: SyncConfig) -> Result<()> {
    match command {
        Commands::Summary {
            seed,
            units,
            unit,
            json,
        } => cli::summary::run(
            config,
            cli::summary::SummaryArgs {
                seed,
                units,
                unit,
                json,
            },
        ),
        Commands::Cache { scope, json } => cli::cache::run(&config, scope.as_deref(), json),
        Commands::Config { json } => cli::config::run(&config, json),
    }
}
