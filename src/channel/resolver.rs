// src/channel/resolver.rs

//! Channel specification resolution
//!
//! Turns raw specification strings into [`Channel`]s. Specs are classified
//! by shape, in order:
//!
//! 1. "no channel" sentinels ([`INVALID_CHANNELS`]) -> the UNKNOWN channel
//! 2. URLs (`https://...`, `file://...`)
//! 3. filesystem paths (`./chan`, `~/chan`, `/abs/chan`)
//! 4. package archives (`chan/linux-64/pkg-1.0-0.tar.bz2`)
//! 5. bare names (`conda-forge`, `myorg/label/dev`)
//!
//! Results are memoized per resolver, keyed by the raw spec.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

use super::{
    Channel, ChannelContext, ChannelParts, DEFAULT_CHANNELS_NAME, INVALID_CHANNELS,
    LOCAL_CHANNELS_NAME,
};
use crate::error::{Error, Result};
use crate::platform;
use crate::url::{has_scheme, host_port, is_package_file, is_path, join_url, path_to_url, split_conda_url};

/// Location and credentials derived from a channel URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfiguration {
    pub location: String,
    pub name: String,
    pub scheme: String,
    pub auth: Option<String>,
    pub token: Option<String>,
}

/// Options for [`ChannelResolver::calculate_channel_urls_for`]
#[derive(Debug, Clone, Default)]
pub struct UrlOptions {
    /// Single platform to build URLs for (plus `noarch`); `None` uses the
    /// configured platforms
    pub platform: Option<String>,
    /// Prepend the `local` multichannel
    pub use_local: bool,
    /// Append the configured channels
    pub append_context_channels: bool,
    /// Include auth and tokens in the URLs
    pub with_credential: bool,
}

/// Resolves channel specs against a [`ChannelContext`]
pub struct ChannelResolver {
    context: ChannelContext,
    cache: Mutex<HashMap<String, Channel>>,
}

impl ChannelResolver {
    pub fn new(context: ChannelContext) -> Self {
        Self {
            context,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &ChannelContext {
        &self.context
    }

    /// Drop all memoized channels
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Resolve a channel spec, memoized by the raw spec string
    ///
    /// A channel without an explicit token picks up the one registered for
    /// its `scheme://location`.
    pub fn resolve(&self, spec: &str) -> Result<Channel> {
        if let Some(channel) = self.cache.lock().get(spec) {
            trace!("Channel cache hit for {}", spec);
            return Ok(channel.clone());
        }

        let mut channel = self.from_value(spec)?;
        if channel.token().is_none() {
            if let Some(token) = self.context.token_for(channel.scheme(), channel.location()) {
                debug!("Using stored token for {}", channel.canonical_name());
                channel.set_token(token.to_string());
            }
        }

        self.cache.lock().insert(spec.to_string(), channel.clone());
        Ok(channel)
    }

    fn from_value(&self, spec: &str) -> Result<Channel> {
        if INVALID_CHANNELS.contains(&spec) {
            return self.unknown_channel();
        }

        if has_scheme(spec) {
            return self.from_url(spec, spec);
        }

        if is_path(spec) {
            let url = path_to_url(spec);
            if url.is_empty() {
                return Err(Error::resolution(spec, "path cannot be converted to a file:// URL"));
            }
            return self.from_url(spec, &url);
        }

        if is_package_file(spec) {
            return self.from_package_spec(spec);
        }

        Ok(self.from_name(spec))
    }

    fn unknown_channel(&self) -> Result<Channel> {
        let members = self
            .context
            .custom_multichannels()
            .get(DEFAULT_CHANNELS_NAME)
            .cloned()
            .unwrap_or_default();

        let fallback = members
            .iter()
            .map(|member| self.resolve(member))
            .collect::<Result<Vec<_>>>()?;
        Ok(Channel::unknown(fallback))
    }

    // `chan/linux-64/pkg.tar.bz2`: resolve the directory, keep the archive
    fn from_package_spec(&self, spec: &str) -> Result<Channel> {
        let Some((dir, filename)) = spec.rsplit_once('/') else {
            return Err(Error::resolution(spec, "package archive without a channel"));
        };

        let channel = self.from_name(dir);
        let mut parts = ChannelParts {
            scheme: channel.scheme().to_string(),
            auth: channel.auth().map(String::from),
            location: channel.location().to_string(),
            token: channel.token().map(String::from),
            name: channel.name().to_string(),
            platform: channel.platform().map(String::from),
            package_filename: Some(filename.to_string()),
        };
        if parts.platform.is_none() {
            parts.platform = Some(platform::NOARCH.to_string());
        }
        let canonical = self.context.canonical_name(&parts);
        Ok(parts.into_channel(canonical))
    }

    fn from_url(&self, spec: &str, url: &str) -> Result<Channel> {
        let parsed = split_conda_url(url)
            .ok_or_else(|| Error::resolution(spec, "not a valid channel URL"))?;

        let config =
            self.read_channel_configuration(&parsed.scheme, &parsed.host, parsed.port, &parsed.path);

        // Credentials in the URL override inherited ones
        let parts = ChannelParts {
            scheme: if config.scheme.is_empty() {
                "https".to_string()
            } else {
                config.scheme
            },
            auth: parsed.auth.or(config.auth),
            location: config.location,
            token: parsed.token.or(config.token),
            name: config.name,
            platform: parsed.platform,
            package_filename: parsed.package_filename,
        };
        let canonical = self.context.canonical_name(&parts);
        Ok(parts.into_channel(canonical))
    }

    /// Derive location, name and inherited credentials for a channel URL
    ///
    /// First match wins: empty path, registered custom channel, channel
    /// alias, host-less (local file) URL, then plain `host[:port]` + path.
    pub fn read_channel_configuration(
        &self,
        scheme: &str,
        host: &str,
        port: Option<u16>,
        path: &str,
    ) -> ChannelConfiguration {
        let spath = path.trim_end_matches('/');
        let location = host_port(host, port);
        let url = format!("{location}{spath}");

        if spath.is_empty() {
            return ChannelConfiguration {
                location,
                scheme: scheme.to_string(),
                ..ChannelConfiguration::default()
            };
        }

        if let Some((channel, rest)) = self.context.match_custom_channel(&url) {
            return ChannelConfiguration {
                location: channel.location().to_string(),
                name: join_url(&[channel.name(), rest]),
                scheme: scheme.to_string(),
                auth: channel.auth().map(String::from),
                token: channel.token().map(String::from),
            };
        }

        if let Some(rest) = self.context.strip_alias(&url) {
            let alias = self.context.channel_alias();
            return ChannelConfiguration {
                location: alias.location().to_string(),
                name: rest.to_string(),
                scheme: scheme.to_string(),
                auth: alias.auth().map(String::from),
                token: alias.token().map(String::from),
            };
        }

        if host.is_empty() {
            let (parent, leaf) = url.rsplit_once('/').unwrap_or(("", url.as_str()));
            return ChannelConfiguration {
                location: if parent.is_empty() { "/".to_string() } else { parent.to_string() },
                name: leaf.to_string(),
                scheme: "file".to_string(),
                ..ChannelConfiguration::default()
            };
        }

        ChannelConfiguration {
            location,
            name: spath.trim_start_matches('/').to_string(),
            scheme: scheme.to_string(),
            ..ChannelConfiguration::default()
        }
    }

    /// Resolve a bare channel name
    ///
    /// The longest `/`-delimited prefix registered as a custom channel
    /// supplies the location and credentials; otherwise the channel alias
    /// does. A trailing platform segment moves into `platform`.
    fn from_name(&self, name: &str) -> Channel {
        let name = name.trim_end_matches('/');
        let custom_channels = self.context.custom_channels();

        let mut prefix = name;
        let custom = loop {
            if let Some(channel) = custom_channels.get(prefix) {
                break Some(channel);
            }
            match prefix.rfind('/') {
                Some(pos) => prefix = &prefix[..pos],
                None => break None,
            }
        };

        let source = custom.unwrap_or_else(|| self.context.channel_alias());
        let mut parts = ChannelParts {
            scheme: source.scheme().to_string(),
            auth: source.auth().map(String::from),
            location: source.location().to_string(),
            token: source.token().map(String::from),
            name: name.to_string(),
            platform: None,
            package_filename: custom.and_then(|c| c.package_filename().map(String::from)),
        };

        if let Some(found) = platform::trailing_platform(&parts.base_url()) {
            parts.platform = Some(found.to_string());
            if let Some(stripped) = name.strip_suffix(found).and_then(|n| n.strip_suffix('/')) {
                parts.name = stripped.to_string();
            }
        }

        let canonical = self.context.canonical_name(&parts);
        parts.into_channel(canonical)
    }

    /// URLs for a list of channel names
    ///
    /// Multichannels expand one level into their members. Channels are
    /// deduplicated by canonical name, keeping the first appearance.
    pub fn calculate_channel_urls<S: AsRef<str>>(
        &self,
        names: &[S],
        platforms: &[String],
        with_credential: bool,
    ) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(names.len() * platforms.len());

        for name in names {
            let name = name.as_ref();
            let members = match self.context.custom_multichannels().get(name) {
                Some(members) => members.clone(),
                None => vec![name.to_string()],
            };

            for member in &members {
                let channel = self.resolve(member)?;
                if !seen.insert(channel.canonical_name().to_string()) {
                    trace!("Skipping duplicate channel {}", channel.canonical_name());
                    continue;
                }
                urls.extend(channel.urls(platforms, with_credential));
            }
        }

        Ok(urls)
    }

    /// URLs for a list of channel names with platform and context options
    pub fn calculate_channel_urls_for<S: AsRef<str>>(
        &self,
        names: &[S],
        options: &UrlOptions,
    ) -> Result<Vec<String>> {
        let platforms = match options.platform.as_deref() {
            Some(p) if !p.is_empty() => platform::default_platforms(p),
            _ => self.context.platforms().to_vec(),
        };

        let mut all_names = Vec::with_capacity(names.len() + 1 + self.context.channels().len());
        if options.use_local {
            all_names.push(LOCAL_CHANNELS_NAME.to_string());
        }
        all_names.extend(names.iter().map(|n| n.as_ref().to_string()));
        if options.append_context_channels {
            all_names.extend(self.context.channels().iter().cloned());
        }

        self.calculate_channel_urls(&all_names, &platforms, options.with_credential)
    }

    /// Reject URLs whose channel is not whitelisted
    ///
    /// With a non-empty whitelist, each URL's credential-free base URL must
    /// equal the base URL of a whitelisted channel.
    pub fn check_whitelist<S: AsRef<str>>(&self, urls: &[S]) -> Result<()> {
        let whitelist = self.context.whitelist();
        if whitelist.is_empty() {
            return Ok(());
        }

        let accepted = whitelist
            .iter()
            .map(|entry| self.resolve(entry).map(|c| c.base_url()))
            .collect::<Result<Vec<_>>>()?;

        for url in urls {
            let url = url.as_ref();
            let base = self.resolve(url)?.base_url();
            if !accepted.contains(&base) {
                return Err(Error::ChannelNotAllowed(url.to_string()));
            }
        }
        Ok(())
    }
}
