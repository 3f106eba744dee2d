//! localfs CLI - lfs command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod util;

/// localfs - local filesystem layer of a file synchronization engine
#[derive(Parser)]
#[command(name = "lfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/localfs/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Escape characters a local filesystem cannot store
    Escape {
        /// Remote node name
        name: String,
    },
    /// Reverse the %xx escaping of a local name
    Unescape {
        /// Local file name
        name: String,
    },
    /// Show the NFC form of a name
    Normalize {
        /// Name to normalize
        name: String,
    },
    /// Show type, size, mtime and filesystem id of a path
    Stat {
        path: PathBuf,
    },
    /// Compute the content fingerprint of a file
    Fingerprint {
        path: PathBuf,
        /// Read through the async worker pool instead of synchronously
        #[arg(long = "async")]
        use_async: bool,
    },
    /// View or edit configuration
    Config {
        /// Print a single value
        #[arg(long, value_name = "KEY")]
        get: Option<String>,
        /// Set a value and save the config file
        #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
        set: Option<Vec<String>>,
        /// Print the config file location
        #[arg(long)]
        path: bool,
        /// Print an annotated example config
        #[arg(long)]
        example: bool,
    },
    /// Watch a directory and report changes as they are detected
    Watch {
        /// Sync root to watch
        dir: PathBuf,
        /// Node cache directory (default: under the local data dir)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Escape { name } => cmd::names::run_escape(&name).await,
        Commands::Unescape { name } => cmd::names::run_unescape(&name).await,
        Commands::Normalize { name } => cmd::names::run_normalize(&name).await,
        Commands::Stat { path } => cmd::stat::run(&path).await,
        Commands::Fingerprint { path, use_async } => {
            cmd::fingerprint::run(config_path.as_deref(), &path, use_async).await
        }
        Commands::Config { get, set, path, example } => {
            if example {
                cmd::config::run_example().await
            } else if path {
                cmd::config::run_path(config_path.as_deref()).await
            } else if let Some(key) = get {
                cmd::config::run_get(config_path.as_deref(), &key).await
            } else if let Some([key, value]) = set.as_deref() {
                cmd::config::run_set(config_path.as_deref(), key, value).await
            } else {
                cmd::config::run_list(config_path.as_deref()).await
            }
        }
        Commands::Watch { dir, state, duration } => {
            cmd::watch::run(config_path.as_deref(), &dir, state, duration).await
        }
    }
}
