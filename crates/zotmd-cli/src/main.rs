//! zotmd CLI
//!
//! Command-line interface for zotmd - Zotero library to markdown sync.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use zotmd_core::Config;

mod commands;
mod output;
mod zotero;

use output::{Output, OutputFormat};

/// Exit status when the run completed but some items failed or it was cancelled
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser)]
#[command(name = "zotmd")]
#[command(about = "zotmd - Keep a folder of markdown notes in sync with a Zotero library")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the output directory up to date with the library
    Sync {
        /// Reconcile every item instead of only changes since the last run
        #[arg(long)]
        full: bool,
    },
    /// Show configuration and sync state
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (library_id, api_key, output_dir, deletion_behavior, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.unwrap_or_else(Config::config_file_path);

    let result = match cli.command {
        Commands::Sync { full } => commands::sync::sync(&config_path, full, &output).await,
        Commands::Status => commands::status::show(&config_path, &output).map(|_| true),
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => commands::config::show(&config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, &config_path, &output)
            }
        }
        .map(|_| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_PARTIAL),
        Err(e) => {
            output.error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over the verbosity flag
fn init_logging(verbose: bool) {
    let default_level = if verbose {
        "zotmd_core=debug,zotmd_cli=debug"
    } else {
        "warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}
