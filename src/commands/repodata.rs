// src/commands/repodata.rs
//! Repodata cache updates

use anyhow::{Context, Result, bail};
use condafetch::channel::UrlOptions;
use condafetch::fetch::RetryPolicy;
use condafetch::repodata::{RepodataStatus, RepodataTarget, update_repodata};
use condafetch::Config;
use std::path::Path;

/// Fetch or revalidate repodata for every subdirectory of the channels
pub async fn cmd_repodata(
    config: &Config,
    names: &[String],
    cache_dir: &Path,
    refresh: bool,
) -> Result<()> {
    let resolver = super::resolver(config);
    let names = super::channel_names(names, config);

    let options = UrlOptions {
        with_credential: true,
        ..UrlOptions::default()
    };
    let urls = resolver
        .calculate_channel_urls_for(&names, &options)
        .context("Failed to resolve channels")?;
    if urls.is_empty() {
        bail!("No channels given and none configured");
    }
    resolver.check_whitelist(&urls)?;

    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;

    let targets: Vec<RepodataTarget> = urls
        .iter()
        .map(|url| RepodataTarget::new(url, cache_dir))
        .collect();

    let ttl = if refresh { 0 } else { config.local_repodata_ttl };
    let engine = super::engine(config)?;
    let outcomes = update_repodata(&engine, &targets, ttl, &RetryPolicy::from_config(config)).await?;

    for outcome in &outcomes {
        let status = match outcome.status {
            RepodataStatus::Fresh => "fresh",
            RepodataStatus::NotModified => "not modified",
            RepodataStatus::Downloaded => "downloaded",
        };
        println!("{:<40} {:<13} {}", outcome.name, status, outcome.cache_path.display());
    }
    Ok(())
}
