// src/commands/mod.rs
//! Command handlers for the condafetch CLI

mod channels;
mod fetch;
mod repodata;
mod resolve;

pub use channels::cmd_channels;
pub use fetch::cmd_fetch;
pub use repodata::cmd_repodata;
pub use resolve::cmd_resolve;

use anyhow::{Context, Result};
use condafetch::fetch::{
    CliProgress, DownloadEngine, EngineOptions, HttpTransportOptions, InterruptFlag, LogProgress,
    ProgressSink, SchemeTransport,
};
use condafetch::{ChannelContext, ChannelResolver, Config};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Load configuration with CLI overrides applied
pub fn load_config(path: Option<&Path>, quiet: bool) -> Result<Config> {
    let mut config = Config::load_or_default(path).context("Failed to load configuration")?;
    config.quiet |= quiet;
    Ok(config)
}

fn resolver(config: &Config) -> ChannelResolver {
    ChannelResolver::new(ChannelContext::new(config))
}

/// Engine wired to the default transports, with Ctrl-C raising its
/// interrupt flag
fn engine(config: &Config) -> Result<DownloadEngine> {
    let transport = SchemeTransport::with_defaults(&HttpTransportOptions::from_config(config))
        .context("Failed to initialize transports")?;

    let progress: Arc<dyn ProgressSink> = if config.quiet {
        Arc::new(LogProgress::new())
    } else {
        Arc::new(CliProgress::new())
    };

    let interrupt = InterruptFlag::new();
    let flag = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping downloads");
            flag.raise();
        }
    });

    Ok(DownloadEngine::new(Arc::new(transport), EngineOptions::from_config(config))
        .with_progress(progress)
        .with_interrupt(interrupt))
}

/// Explicit names, or the configured channels when none are given
fn channel_names(names: &[String], config: &Config) -> Vec<String> {
    if names.is_empty() {
        config.channels.clone()
    } else {
        names.to_vec()
    }
}
