// src/channel/context.rs

//! Channel registry built once from configuration
//!
//! Holds the channel alias, custom channels, multichannels, the whitelist and
//! discovered tokens. A context is constructed explicitly and passed to the
//! resolver; nothing here is process-global.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::tokens::load_tokens;
use super::{Channel, ChannelParts, DEFAULT_CHANNELS_NAME, LOCAL_CHANNELS_NAME};
use crate::config::Config;
use crate::url::{UrlParts, join_url, path_to_url, split_scheme_auth_token};

/// Custom channels registered regardless of configuration
const DEFAULT_CUSTOM_CHANNELS: &[(&str, &str)] = &[("pkgs/pro", "https://repo.anaconda.com")];

/// Immutable channel registry
#[derive(Debug, Clone)]
pub struct ChannelContext {
    channel_alias: Channel,
    custom_channels: BTreeMap<String, Channel>,
    custom_multichannels: BTreeMap<String, Vec<String>>,
    whitelist: Vec<String>,
    channel_tokens: HashMap<String, String>,
    platforms: Vec<String>,
    channels: Vec<String>,
}

impl ChannelContext {
    /// Build the registry from configuration
    ///
    /// Registers `defaults`, `local` (existing `conda-bld` directories only),
    /// `pkgs/pro`, then the user's custom channels and multichannels, and
    /// loads tokens from the configured token locations.
    pub fn new(config: &Config) -> Self {
        let channel_alias = alias_channel(&config.channel_alias);
        let mut custom_channels = BTreeMap::new();
        let mut custom_multichannels = BTreeMap::new();

        let mut default_names = Vec::with_capacity(config.default_channels.len());
        for url in &config.default_channels {
            let channel = simple_channel(&channel_alias, url, None, Some(DEFAULT_CHANNELS_NAME));
            let name = channel.name().to_string();
            custom_channels.insert(name.clone(), channel);
            default_names.push(name);
        }
        custom_multichannels.insert(DEFAULT_CHANNELS_NAME.to_string(), default_names);

        // Keyed by URL: every build directory has the same leaf name
        let mut local_names = Vec::new();
        for dir in config.local_build_dirs() {
            if !dir.is_dir() {
                continue;
            }
            let url = path_to_url(&dir.to_string_lossy());
            if url.is_empty() || local_names.contains(&url) {
                continue;
            }
            debug!("Registering local channel {}", url);
            let channel = simple_channel(&channel_alias, &url, None, Some(LOCAL_CHANNELS_NAME));
            custom_channels.insert(url.clone(), channel);
            local_names.push(url);
        }
        custom_multichannels.insert(LOCAL_CHANNELS_NAME.to_string(), local_names);

        for (name, url) in DEFAULT_CUSTOM_CHANNELS {
            custom_channels.insert(
                name.to_string(),
                simple_channel(&channel_alias, url, Some(name), None),
            );
        }

        for (name, url) in &config.custom_channels {
            custom_channels.insert(
                name.clone(),
                simple_channel(&channel_alias, url, Some(name), None),
            );
        }

        for (name, members) in &config.custom_multichannels {
            custom_multichannels.insert(name.clone(), members.clone());
        }

        Self {
            channel_alias,
            custom_channels,
            custom_multichannels,
            whitelist: config.whitelist_channels.clone(),
            channel_tokens: load_tokens(&config.token_locations),
            platforms: config.platforms(),
            channels: config.channels.clone(),
        }
    }

    /// Add tokens keyed by `scheme://location`, overriding discovered ones
    pub fn with_tokens(mut self, tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        self.channel_tokens.extend(tokens);
        self
    }

    pub fn channel_alias(&self) -> &Channel {
        &self.channel_alias
    }

    pub fn custom_channels(&self) -> &BTreeMap<String, Channel> {
        &self.custom_channels
    }

    pub fn custom_multichannels(&self) -> &BTreeMap<String, Vec<String>> {
        &self.custom_multichannels
    }

    /// Allowed base URLs (empty = unrestricted)
    pub fn whitelist(&self) -> &[String] {
        &self.whitelist
    }

    pub fn channel_tokens(&self) -> &HashMap<String, String> {
        &self.channel_tokens
    }

    /// Configured platforms, target platform first
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    /// Configured channel names
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub(crate) fn token_for(&self, scheme: &str, location: &str) -> Option<&str> {
        self.channel_tokens
            .get(&format!("{scheme}://{location}"))
            .map(String::as_str)
    }

    /// Find the custom channel whose `location/name` is the longest
    /// segment-aligned prefix of `url` (given without scheme)
    ///
    /// Returns the channel and the remaining path below it.
    pub(crate) fn match_custom_channel<'a>(&'a self, url: &'a str) -> Option<(&'a Channel, &'a str)> {
        let mut best: Option<(&Channel, &str, usize)> = None;

        for channel in self.custom_channels.values() {
            let prefix = join_url(&[channel.location(), channel.name()]);
            let Some(rest) = url.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if !rest.is_empty() && !rest.starts_with('/') {
                continue;
            }
            if best.is_none_or(|(_, _, len)| prefix.len() > len) {
                best = Some((channel, rest.trim_matches('/'), prefix.len()));
            }
        }

        best.map(|(channel, rest, _)| (channel, rest))
    }

    /// Remaining path if `url` (without scheme) lives under the channel alias
    pub(crate) fn strip_alias<'a>(&self, url: &'a str) -> Option<&'a str> {
        strip_location(url, self.channel_alias.location())
    }

    /// Canonical name for freshly resolved channel fields
    pub(crate) fn canonical_name(&self, parts: &ChannelParts) -> String {
        if self.custom_channels.contains_key(&parts.name) {
            parts.name.clone()
        } else if parts.location == self.channel_alias.location() {
            parts.name.clone()
        } else if !parts.scheme.is_empty() {
            parts.base_url()
        } else {
            join_url(&[&parts.location, &parts.name])
                .trim_start_matches('/')
                .to_string()
        }
    }
}

/// Strip a location prefix from a scheme-less URL on a segment boundary
fn strip_location<'a>(url: &'a str, location: &str) -> Option<&'a str> {
    if location.is_empty() {
        return None;
    }
    let rest = url.strip_prefix(location)?;
    (rest.is_empty() || rest.starts_with('/')).then(|| rest.trim_matches('/'))
}

fn alias_channel(alias: &str) -> Channel {
    let split = split_scheme_auth_token(alias);
    let scheme = if split.scheme.is_empty() {
        "https".to_string()
    } else {
        split.scheme
    };

    ChannelParts {
        scheme,
        auth: split.auth,
        location: split.remainder,
        token: split.token,
        ..ChannelParts::default()
    }
    .into_channel(String::new())
}

/// Build a channel registered by the context itself
///
/// `channel_url` is either a full URL or a bare name under the alias. When
/// no explicit name is given it is derived from the URL path.
fn simple_channel(
    alias: &Channel,
    channel_url: &str,
    channel_name: Option<&str>,
    multi_name: Option<&str>,
) -> Channel {
    let split = split_scheme_auth_token(channel_url);
    let mut parts = ChannelParts {
        scheme: split.scheme,
        auth: split.auth,
        location: split.remainder,
        token: split.token,
        name: channel_name.unwrap_or_default().to_string(),
        ..ChannelParts::default()
    };

    if parts.scheme.is_empty() {
        parts.scheme = alias.scheme().to_string();
        parts.auth = alias.auth().map(String::from);
        parts.location = alias.location().to_string();
        parts.token = alias.token().map(String::from);
    } else if parts.name.is_empty() {
        if let Some(rest) = strip_location(&parts.location, alias.location()) {
            parts.name = rest.to_string();
            parts.location = alias.location().to_string();
        } else if let Some(url) = UrlParts::parse(&format!("{}://{}", parts.scheme, parts.location)) {
            if url.host.is_empty() {
                let path = url.path.trim_end_matches('/');
                let (parent, leaf) = path.rsplit_once('/').unwrap_or(("", path));
                parts.location = if parent.is_empty() { "/".to_string() } else { parent.to_string() };
                parts.name = leaf.to_string();
            } else {
                parts.location = url.host_port();
                parts.name = url.path.trim_start_matches('/').to_string();
            }
        }
    }

    parts.name = if parts.name.is_empty() {
        channel_url.trim_matches('/').to_string()
    } else {
        parts.name.trim_matches('/').to_string()
    };

    let canonical = multi_name.unwrap_or(&parts.name).to_string();
    parts.into_channel(canonical)
}
