//! settle - debounced change processing for a directory tree

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod cmd;
mod config;
mod extractor;
mod util;

/// settle - process files once they stop changing
#[derive(Parser)]
#[command(name = "settle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and process settled changes until Ctrl-C
    Watch {
        /// Directory to watch (default: current directory)
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Config file (default: $CONFIG_DIR/settle/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Debounce window in seconds
        #[arg(long)]
        delay: Option<f64>,

        /// Latency ceiling in seconds
        #[arg(long)]
        max_delay: Option<f64>,

        /// Discard stale state and queue every file at startup
        #[arg(long)]
        initial_scan: bool,

        /// Print the final status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect configuration
    Config {
        /// Print the config file location
        #[arg(long, conflicts_with = "example")]
        path: bool,

        /// Print an example config file
        #[arg(long)]
        example: bool,

        /// Config file to show (default: $CONFIG_DIR/settle/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    match cli.command {
        Commands::Watch {
            root,
            config,
            workers,
            delay,
            max_delay,
            initial_scan,
            json,
        } => {
            cmd::watch::run(cmd::watch::WatchArgs {
                root,
                config,
                workers,
                delay,
                max_delay,
                initial_scan,
                json,
            })
            .await
        }
        Commands::Config { path, example, config } => {
            if path {
                cmd::config::run_path().await
            } else if example {
                cmd::config::run_example().await
            } else {
                cmd::config::run_show(config.as_deref()).await
            }
        }
    }
}
