// src/config.rs
//! Configuration for channel resolution and downloads
//!
//! Loaded from a TOML file, then overridden from the environment:
//! - `CONDA_SUBDIR` - target platform
//! - `CONDA_PREFIX` - target prefix (for `local` build channels)
//! - `MAMBA_ROOT_PREFIX` - root prefix (for `local` build channels)
//! - `CONDAFETCH_MAX_PARALLEL` - parallel download limit
//!
//! # Example (TOML)
//!
//! ```toml
//! channel_alias = "https://conda.anaconda.org"
//! channels = ["conda-forge"]
//! whitelist_channels = ["https://conda.anaconda.org/conda-forge"]
//! max_parallel_downloads = 8
//!
//! [custom_channels]
//! myorg = "https://example.org"
//!
//! [custom_multichannels]
//! internal = ["myorg", "conda-forge"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::platform;

/// Default location for a config file (`~/.config/condafetch/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("condafetch").join("config.toml"))
}

/// Channel and download configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL prepended to bare channel names
    pub channel_alias: String,

    /// Members of the `defaults` multichannel
    pub default_channels: Vec<String>,

    /// Channel name -> base URL the channel lives under
    pub custom_channels: BTreeMap<String, String>,

    /// Multichannel name -> ordered member channel names
    pub custom_multichannels: BTreeMap<String, Vec<String>>,

    /// Allowed base channel URLs (empty = unrestricted)
    pub whitelist_channels: Vec<String>,

    /// Channels appended when a command asks for the configured channels
    pub channels: Vec<String>,

    /// Target platform (defaults to the host platform)
    pub platform: String,

    /// Maximum number of simultaneous transfers
    pub max_parallel_downloads: usize,

    /// Retry attempts after the first failure
    pub max_retries: u32,

    /// Base retry delay in seconds
    pub retry_timeout: u64,

    /// Multiplier applied to the retry delay per attempt
    pub retry_backoff: u32,

    /// Per-transfer network timeout in seconds (0 = none)
    pub download_timeout: u64,

    /// Verify TLS certificates
    pub ssl_verify: bool,

    /// Directories searched for `*.token` files
    pub token_locations: Vec<String>,

    /// Environment prefix being operated on
    pub target_prefix: Option<PathBuf>,

    /// Installation root prefix
    pub root_prefix: Option<PathBuf>,

    /// Repodata freshness: 0 = always revalidate, 1 = honor Cache-Control,
    /// N = N seconds
    pub local_repodata_ttl: u64,

    /// Suppress progress output
    pub quiet: bool,
}

fn default_channel_alias() -> String {
    "https://conda.anaconda.org".to_string()
}

fn default_default_channels() -> Vec<String> {
    let mut channels = vec![
        "https://repo.anaconda.com/pkgs/main".to_string(),
        "https://repo.anaconda.com/pkgs/r".to_string(),
    ];
    if cfg!(windows) {
        channels.push("https://repo.anaconda.com/pkgs/msys2".to_string());
    }
    channels
}

fn default_token_locations() -> Vec<String> {
    vec!["~/.continuum/anaconda-client/tokens".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_alias: default_channel_alias(),
            default_channels: default_default_channels(),
            custom_channels: BTreeMap::new(),
            custom_multichannels: BTreeMap::new(),
            whitelist_channels: Vec::new(),
            channels: Vec::new(),
            platform: platform::host_platform().to_string(),
            max_parallel_downloads: 5,
            max_retries: 3,
            retry_timeout: 2,
            retry_backoff: 3,
            download_timeout: 300,
            ssl_verify: true,
            token_locations: default_token_locations(),
            target_prefix: None,
            root_prefix: None,
            local_repodata_ttl: 1,
            quiet: false,
        }
    }
}

impl Config {
    /// Load a config file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        let mut config = Self::from_toml(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load the config file if one exists, otherwise defaults, then apply
    /// environment overrides
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                debug!("No config file found, using defaults");
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parse TOML without environment overrides
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(format!("Invalid TOML: {e}")))
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(subdir) = lookup("CONDA_SUBDIR").filter(|s| !s.is_empty()) {
            debug!("Platform overridden by CONDA_SUBDIR: {}", subdir);
            self.platform = subdir;
        }
        if let Some(prefix) = lookup("CONDA_PREFIX").filter(|s| !s.is_empty()) {
            self.target_prefix = Some(PathBuf::from(prefix));
        }
        if let Some(prefix) = lookup("MAMBA_ROOT_PREFIX").filter(|s| !s.is_empty()) {
            self.root_prefix = Some(PathBuf::from(prefix));
        }
        if let Some(value) = lookup("CONDAFETCH_MAX_PARALLEL") {
            match value.parse::<usize>() {
                Ok(n) => self.max_parallel_downloads = n,
                Err(_) => debug!("Ignoring invalid CONDAFETCH_MAX_PARALLEL: {}", value),
            }
        }
    }

    /// Check values that would make the engine or resolver misbehave
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_downloads == 0 {
            return Err(Error::ConfigError(
                "max_parallel_downloads must be at least 1".to_string(),
            ));
        }
        if self.retry_backoff == 0 {
            return Err(Error::ConfigError("retry_backoff must be at least 1".to_string()));
        }
        if self.channel_alias.trim().is_empty() {
            return Err(Error::ConfigError("channel_alias must not be empty".to_string()));
        }
        if !platform::is_known_platform(&self.platform) {
            return Err(Error::ConfigError(format!("Unknown platform: {}", self.platform)));
        }
        Ok(())
    }

    /// Configured platforms: the target platform plus `noarch`
    pub fn platforms(&self) -> Vec<String> {
        platform::default_platforms(&self.platform)
    }

    /// Network timeout for a single transfer
    pub fn download_timeout(&self) -> Option<Duration> {
        (self.download_timeout > 0).then(|| Duration::from_secs(self.download_timeout))
    }

    /// Candidate `conda-bld` directories backing the `local` multichannel
    pub fn local_build_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(prefix) = &self.target_prefix {
            dirs.push(prefix.join("conda-bld"));
        }
        if let Some(prefix) = &self.root_prefix {
            dirs.push(prefix.join("conda-bld"));
        }
        if let Some(home) = dirs::home_dir() {
            dirs.push(home.join("conda-bld"));
        }
        dirs
    }
}
