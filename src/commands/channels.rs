// src/commands/channels.rs
//! Channel URL listing

use anyhow::{Context, Result, bail};
use condafetch::Config;
use condafetch::channel::UrlOptions;
use tracing::info;

/// Print the URLs of the given channels after the whitelist check
pub fn cmd_channels(
    config: &Config,
    names: &[String],
    platform: Option<String>,
    with_credentials: bool,
    use_local: bool,
    append_config_channels: bool,
) -> Result<()> {
    let resolver = super::resolver(config);
    let names = if append_config_channels {
        names.to_vec()
    } else {
        super::channel_names(names, config)
    };

    let options = UrlOptions {
        platform,
        use_local,
        append_context_channels: append_config_channels,
        with_credential: with_credentials,
    };
    let urls = resolver
        .calculate_channel_urls_for(&names, &options)
        .context("Failed to resolve channels")?;

    if urls.is_empty() {
        bail!("No channels given and none configured");
    }

    resolver.check_whitelist(&urls)?;
    info!("Resolved {} channel URLs", urls.len());

    for url in &urls {
        println!("{}", url);
    }
    Ok(())
}
