// src/cli.rs
//! CLI definitions for condafetch
//!
//! Command implementations live in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "condafetch")]
#[command(author = "Condafetch Contributors")]
#[command(version)]
#[command(about = "Resolve conda channels and download packages concurrently", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.config/condafetch/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the URLs of resolved channels
    Channels {
        /// Channel names, URLs or paths (default: configured channels)
        names: Vec<String>,

        /// Target platform (default: configured platform)
        #[arg(short, long)]
        platform: Option<String>,

        /// Include user/password and token in the URLs
        #[arg(long)]
        with_credentials: bool,

        /// Prepend the local conda-bld channels
        #[arg(long)]
        use_local: bool,

        /// Append the channels from the configuration file
        #[arg(long)]
        append_config_channels: bool,
    },

    /// Show how a single channel specification resolves
    Resolve {
        /// Channel name, URL, path or package file
        spec: String,
    },

    /// Download files concurrently
    Fetch {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Destination directory
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,

        /// Expected SHA-256 (only with a single URL)
        #[arg(long)]
        sha256: Option<String>,

        /// Expected size in bytes (only with a single URL)
        #[arg(long)]
        size: Option<u64>,

        /// Stop at the first failed download
        #[arg(long)]
        fail_fast: bool,
    },

    /// Fetch or revalidate repodata.json for channels
    Repodata {
        /// Channel names (default: configured channels)
        names: Vec<String>,

        /// Cache directory for repodata and its state files
        #[arg(long)]
        cache_dir: PathBuf,

        /// Always revalidate, ignoring cache freshness
        #[arg(long)]
        refresh: bool,
    },
}
