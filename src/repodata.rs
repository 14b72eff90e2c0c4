// src/repodata.rs

//! Repodata download and revalidation
//!
//! Each channel subdirectory's `repodata.json` is cached as
//! `<cache_dir>/<key>.json`, where `<key>` is derived from the credential-free
//! URL. A sidecar `<key>.state.json` records the revalidation headers of the
//! response it came from:
//!
//! ```json
//! {
//!   "url": "https://conda.anaconda.org/conda-forge/linux-64/repodata.json",
//!   "etag": "\"5f3e...\"",
//!   "mod": "Tue, 05 Mar 2024 10:00:00 GMT",
//!   "cache_control": "public, max-age=1200",
//!   "fetched_at": "2024-03-05T10:01:00Z"
//! }
//! ```
//!
//! Downloads go to a `.part` file; the finalizer moves it into place only for
//! a successful response and keeps the cache as-is on `304 Not Modified`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fetch::{DownloadEngine, RetryPolicy, Transfer};
use crate::hash;
use crate::url::{join_url, strip_credentials};

pub const REPODATA_FILENAME: &str = "repodata.json";
const STATE_SUFFIX: &str = ".state.json";
const PART_SUFFIX: &str = ".part";

/// Revalidation state stored next to a cached repodata file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepodataState {
    /// Credential-free URL the cache was fetched from
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// `Last-Modified` of the cached response
    #[serde(rename = "mod", default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RepodataState {
    /// Read a state file; `None` if missing or unreadable
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Ignoring corrupt cache state {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            Error::IoError(format!("Failed to write cache state {}: {e}", path.display()))
        })
    }

    /// `max-age` from the stored `Cache-Control`, in seconds
    pub fn max_age(&self) -> Option<u64> {
        self.cache_control
            .as_deref()?
            .split(',')
            .filter_map(|directive| directive.trim().strip_prefix("max-age="))
            .find_map(|value| value.trim().parse().ok())
    }

    /// Whether the cache may be used without asking the server
    ///
    /// `ttl`: 0 = always revalidate, 1 = honor `Cache-Control: max-age`,
    /// N = N seconds.
    pub fn is_fresh(&self, ttl: u64, now: DateTime<Utc>) -> bool {
        let max_age = match ttl {
            0 => return false,
            1 => match self.max_age() {
                Some(age) => age,
                None => return false,
            },
            seconds => seconds,
        };

        let age = now.signed_duration_since(self.fetched_at).num_seconds();
        age >= 0 && (age as u64) < max_age
    }
}

/// Cache key for a repodata URL: first 8 hex digits of its MD5
pub fn cache_key(url: &str) -> String {
    let digest = hash::md5(strip_credentials(url).as_bytes());
    digest[..8].to_string()
}

/// What happened to a repodata target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepodataStatus {
    /// Cache used without contacting the server
    Fresh,
    /// Server confirmed the cache with 304
    NotModified,
    /// New content downloaded
    Downloaded,
}

/// Cached repodata for one channel subdirectory
#[derive(Debug, Clone)]
pub struct RepodataTarget {
    name: String,
    url: String,
    cache_path: PathBuf,
    state_path: PathBuf,
    state: Option<RepodataState>,
}

impl RepodataTarget {
    /// Target for a subdirectory URL (`.../conda-forge/linux-64`)
    ///
    /// Loads existing cache state if both the cache file and a state
    /// matching this URL are present.
    pub fn new(subdir_url: &str, cache_dir: &Path) -> Self {
        let url = join_url(&[subdir_url, REPODATA_FILENAME]);
        let key = cache_key(&url);
        let cache_path = cache_dir.join(format!("{key}.json"));
        let state_path = cache_dir.join(format!("{key}{STATE_SUFFIX}"));

        let public_url = strip_credentials(&url);
        let state = if cache_path.is_file() {
            RepodataState::load(&state_path).filter(|s| s.url == public_url)
        } else {
            None
        };

        Self {
            name: display_name(&public_url),
            url,
            cache_path,
            state_path,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repodata URL, credentials included
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn state(&self) -> Option<&RepodataState> {
        self.state.as_ref()
    }

    pub fn is_fresh(&self, ttl: u64, now: DateTime<Utc>) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_fresh(ttl, now))
    }

    fn part_path(&self) -> PathBuf {
        let mut path = self.cache_path.clone().into_os_string();
        path.push(PART_SUFFIX);
        PathBuf::from(path)
    }

    /// Conditional transfer that updates the cache when finalized
    pub fn transfer(&self) -> Transfer {
        let (etag, last_modified) = match &self.state {
            Some(state) => (state.etag.clone(), state.last_modified.clone()),
            None => (None, None),
        };

        let cache_path = self.cache_path.clone();
        let state_path = self.state_path.clone();
        let part_path = self.part_path();
        let public_url = strip_credentials(&self.url);
        let previous = self.state.clone();

        Transfer::new(self.name.clone(), self.url.clone(), self.part_path())
            .with_cache_headers(etag, last_modified)
            .with_finalizer(Arc::new(move |transfer: &Transfer| {
                let now = Utc::now();

                if transfer.is_not_modified() {
                    let mut state = previous.clone().unwrap_or_else(|| RepodataState {
                        url: public_url.clone(),
                        etag: None,
                        last_modified: None,
                        cache_control: None,
                        fetched_at: now,
                    });
                    state.fetched_at = now;
                    if let Some(cache_control) = transfer.cache_control() {
                        state.cache_control = Some(cache_control.to_string());
                    }
                    debug!("{} not modified", public_url);
                    return state.save(&state_path);
                }

                let status = transfer.http_status();
                if !(200..300).contains(&status) {
                    return Err(Error::HttpStatus {
                        url: strip_credentials(transfer.final_url()),
                        status,
                    });
                }

                std::fs::rename(&part_path, &cache_path).map_err(|e| {
                    Error::IoError(format!("Failed to move {} into cache: {e}", part_path.display()))
                })?;

                RepodataState {
                    url: public_url.clone(),
                    etag: transfer.etag().map(String::from),
                    last_modified: transfer.last_modified().map(String::from),
                    cache_control: transfer.cache_control().map(String::from),
                    fetched_at: now,
                }
                .save(&state_path)
            }))
    }
}

// `https://host/chan/linux-64/repodata.json` -> `chan/linux-64`
fn display_name(url: &str) -> String {
    let without_file = url.strip_suffix(REPODATA_FILENAME).unwrap_or(url);
    let segments: Vec<&str> = without_file
        .trim_end_matches('/')
        .rsplit('/')
        .take(2)
        .collect();
    segments.into_iter().rev().collect::<Vec<_>>().join("/")
}

/// Result for one repodata target
#[derive(Debug, Clone)]
pub struct RepodataOutcome {
    pub name: String,
    pub cache_path: PathBuf,
    pub status: RepodataStatus,
}

/// Bring the repodata cache of every target up to date
///
/// Fresh targets are skipped; the rest are fetched through the engine as
/// conditional requests. Any failed target fails the call.
pub async fn update_repodata(
    engine: &DownloadEngine,
    targets: &[RepodataTarget],
    ttl: u64,
    policy: &RetryPolicy,
) -> Result<Vec<RepodataOutcome>> {
    let now = Utc::now();
    let mut outcomes = Vec::with_capacity(targets.len());
    let mut transfers = Vec::new();
    let mut pending = Vec::new();

    for target in targets {
        if target.is_fresh(ttl, now) {
            debug!("Using fresh cache for {}", target.name());
            outcomes.push(RepodataOutcome {
                name: target.name().to_string(),
                cache_path: target.cache_path().to_path_buf(),
                status: RepodataStatus::Fresh,
            });
        } else {
            transfers.push(target.transfer());
            pending.push(target);
        }
    }

    let report = engine.run_with_retry(transfers, policy, false).await?;
    let transfers = report.into_result()?;

    for (target, transfer) in pending.into_iter().zip(transfers) {
        let status = if transfer.is_not_modified() {
            RepodataStatus::NotModified
        } else {
            RepodataStatus::Downloaded
        };
        outcomes.push(RepodataOutcome {
            name: target.name().to_string(),
            cache_path: target.cache_path().to_path_buf(),
            status,
        });
    }

    info!("Repodata up to date for {} subdirectories", outcomes.len());
    Ok(outcomes)
}
