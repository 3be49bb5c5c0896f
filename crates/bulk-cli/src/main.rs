//! bulk: batch commands from concurrent sessions into blocks.
//!
//! Reads `connect` / `receive` / `disconnect` directives interactively or
//! from a script and prints each completed block as a `bulk:` line, while
//! also writing it to a log file.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

/// bulk: session-based command batcher
#[derive(Parser, Debug)]
#[command(name = "bulk", version, about = "Batch commands from concurrent sessions into blocks")]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "~/.bulk/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Directory for per-block log files
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// Number of file writer threads
    #[arg(long, global = true)]
    file_workers: Option<usize>,

    /// Maximum time to wait for output to drain, in milliseconds
    #[arg(long, global = true)]
    drain_timeout_ms: Option<u64>,

    /// Join a command line split across two `receive` calls
    #[arg(long, global = true)]
    reassemble_lines: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read directives from stdin (the default)
    Interactive,

    /// Execute a script of directives without prompts or error output
    Run {
        /// Script file, one directive per line
        file: PathBuf,
    },

    /// Replay the built-in two-session scenario
    Demo {
        /// Bulk size for both sessions
        #[arg(long, default_value_t = 3)]
        block_size: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout is reserved for `bulk:` lines.
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let overrides = config::Overrides {
        log_dir: cli.log_dir.clone(),
        file_workers: cli.file_workers,
        drain_timeout_ms: cli.drain_timeout_ms,
        reassemble_lines: cli.reassemble_lines,
    };
    let cfg = match config::load(&cli.config, &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("bulk: {e:#}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        None | Some(Command::Interactive) => commands::run::interactive(&cfg).await,
        Some(Command::Run { file }) => commands::run::script(&cfg, &file).await,
        Some(Command::Demo { block_size }) => commands::demo::run(cfg, block_size).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("bulk: {e:#}");
        std::process::exit(1);
    }
}
