// src/commands/fetch.rs
//! Concurrent file downloads

use anyhow::{Context, Result, anyhow, bail};
use condafetch::fetch::{RetryPolicy, Transfer, format_bytes};
use condafetch::url::{strip_credentials, url_filename};
use condafetch::{Config, Hash};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Download `urls` into `dest`
///
/// `sha256` and `size` describe the expected artifact and are only accepted
/// for a single URL.
pub async fn cmd_fetch(
    config: &Config,
    urls: &[String],
    dest: &Path,
    sha256: Option<&str>,
    size: Option<u64>,
    fail_fast: bool,
) -> Result<()> {
    if urls.len() > 1 && (sha256.is_some() || size.is_some()) {
        bail!("--sha256 and --size can only be used with a single URL");
    }

    let checksum = sha256
        .map(Hash::sha256)
        .transpose()
        .map_err(|e| anyhow!("Invalid --sha256 value: {e}"))?;

    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create destination {}", dest.display()))?;

    let mut transfers = Vec::with_capacity(urls.len());
    let mut filenames = HashSet::with_capacity(urls.len());
    for url in urls {
        let filename = url_filename(url)
            .ok_or_else(|| anyhow!("Cannot derive a file name from {}", strip_credentials(url)))?;
        if !filenames.insert(filename) {
            bail!(
                "{} would overwrite another download named {filename}; fetch it separately",
                strip_credentials(url)
            );
        }
        let mut transfer = Transfer::new(filename, url.as_str(), dest.join(filename));
        if let Some(size) = size {
            transfer = transfer.with_expected_size(size);
        }
        if let Some(checksum) = &checksum {
            transfer = transfer.with_checksum(checksum.clone());
        }
        transfers.push(transfer);
    }

    let engine = super::engine(config)?;
    let policy = RetryPolicy::from_config(config);
    let report = engine.run_with_retry(transfers, &policy, fail_fast).await?;

    let total_bytes = report.total_bytes();
    let transfers = report.into_result()?;
    info!("Downloaded {} files ({})", transfers.len(), format_bytes(total_bytes));

    for transfer in &transfers {
        println!("{}", transfer.destination().display());
    }
    Ok(())
}
