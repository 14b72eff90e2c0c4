// src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

/// Default log filter for a `-v` count; `RUST_LOG` takes precedence
fn log_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref(), cli.quiet)?;

    match cli.command {
        Commands::Channels {
            names,
            platform,
            with_credentials,
            use_local,
            append_config_channels,
        } => commands::cmd_channels(
            &config,
            &names,
            platform,
            with_credentials,
            use_local,
            append_config_channels,
        ),
        Commands::Resolve { spec } => commands::cmd_resolve(&config, &spec),
        Commands::Fetch {
            urls,
            dest,
            sha256,
            size,
            fail_fast,
        } => commands::cmd_fetch(&config, &urls, &dest, sha256.as_deref(), size, fail_fast).await,
        Commands::Repodata {
            names,
            cache_dir,
            refresh,
        } => commands::cmd_repodata(&config, &names, &cache_dir, refresh).await,
    }
}
