// src/channel/mod.rs

//! Conda channels
//!
//! A [`Channel`] is the resolved form of a channel specification such as
//! `conda-forge`, `https://example.org/myorg/linux-64` or `./local-chan`.
//! Channels are produced by the [`ChannelResolver`] against an explicit
//! [`ChannelContext`] and never change after construction.

pub mod context;
pub mod resolver;
pub mod tokens;

pub use context::ChannelContext;
pub use resolver::{ChannelConfiguration, ChannelResolver, UrlOptions};

use std::fmt;

use crate::platform::NOARCH;
use crate::url::join_url;

/// Canonical name of the channel produced for "no channel" sentinels
pub const UNKNOWN_CHANNEL: &str = "<unknown>";

/// Multichannel holding the configured default channels
pub const DEFAULT_CHANNELS_NAME: &str = "defaults";

/// Multichannel holding local `conda-bld` directories
pub const LOCAL_CHANNELS_NAME: &str = "local";

/// Specification strings that resolve to the UNKNOWN channel
pub const INVALID_CHANNELS: &[&str] = &[
    "<unknown>",
    "None:///<unknown>",
    "None",
    "",
    ":///<unknown>",
];

/// Raw channel fields before a canonical name is attached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChannelParts {
    pub scheme: String,
    pub auth: Option<String>,
    pub location: String,
    pub token: Option<String>,
    pub name: String,
    pub platform: Option<String>,
    pub package_filename: Option<String>,
}

impl ChannelParts {
    pub(crate) fn into_channel(self, canonical_name: String) -> Channel {
        Channel {
            scheme: self.scheme,
            auth: self.auth,
            location: self.location,
            token: self.token,
            name: self.name,
            platform: self.platform,
            package_filename: self.package_filename,
            canonical_name,
            fallback: Vec::new(),
        }
    }

    /// Credential-free `scheme://location/name`
    pub(crate) fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, join_url(&[&self.location, &self.name]))
    }
}

/// A resolved channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    scheme: String,
    auth: Option<String>,
    location: String,
    token: Option<String>,
    name: String,
    platform: Option<String>,
    package_filename: Option<String>,
    canonical_name: String,
    // Members of `defaults`, used only by the UNKNOWN channel
    fallback: Vec<Channel>,
}

impl Channel {
    /// The UNKNOWN channel; its URLs are those of `fallback`
    pub(crate) fn unknown(fallback: Vec<Channel>) -> Self {
        let mut channel = ChannelParts {
            name: UNKNOWN_CHANNEL.to_string(),
            ..ChannelParts::default()
        }
        .into_channel(UNKNOWN_CHANNEL.to_string());
        channel.fallback = fallback;
        channel
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    /// Host, optional port and base path, without scheme
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Platform fixed by the specification, if any
    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn package_filename(&self) -> Option<&str> {
        self.package_filename.as_deref()
    }

    /// Normalized, credential-free identifier used for deduplication
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn is_unknown(&self) -> bool {
        self.canonical_name == UNKNOWN_CHANNEL
    }

    pub(crate) fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Credential-free `scheme://location/name` ("" for the UNKNOWN channel)
    pub fn base_url(&self) -> String {
        if self.is_unknown() {
            return String::new();
        }
        format!("{}://{}", self.scheme, join_url(&[&self.location, &self.name]))
    }

    fn build_url(&self, base: &str, with_credential: bool) -> String {
        match self.auth.as_deref() {
            Some(auth) if with_credential => format!("{}://{}@{}", self.scheme, auth, base),
            _ => format!("{}://{}", self.scheme, base),
        }
    }

    fn base_with_token(&self, with_credential: bool) -> String {
        match self.token.as_deref() {
            Some(token) if with_credential => {
                join_url(&[&self.location, "t", token, &self.name])
            }
            _ => join_url(&[&self.location, &self.name]),
        }
    }

    /// Subdirectory URLs of this channel
    ///
    /// A channel with a fixed platform yields that platform and `noarch`
    /// (only `noarch` if the fixed platform is `noarch`). Otherwise one URL is
    /// produced per requested platform, in order. The UNKNOWN channel yields
    /// the URLs of the `defaults` members.
    pub fn urls(&self, platforms: &[String], with_credential: bool) -> Vec<String> {
        if self.is_unknown() {
            return self
                .fallback
                .iter()
                .flat_map(|channel| channel.urls(platforms, with_credential))
                .collect();
        }

        let base = self.base_with_token(with_credential);
        match self.platform.as_deref() {
            Some(NOARCH) => vec![self.build_url(&join_url(&[&base, NOARCH]), with_credential)],
            Some(platform) => vec![
                self.build_url(&join_url(&[&base, platform]), with_credential),
                self.build_url(&join_url(&[&base, NOARCH]), with_credential),
            ],
            None => platforms
                .iter()
                .map(|p| self.build_url(&join_url(&[&base, p]), with_credential))
                .collect(),
        }
    }

    /// Single URL of this channel
    ///
    /// Includes the package filename when the channel was resolved from an
    /// archive URL. Channels without a platform point at `noarch`.
    pub fn url(&self, with_credential: bool) -> String {
        let base = self.base_with_token(with_credential);
        let full = match (self.platform.as_deref(), self.package_filename.as_deref()) {
            (Some(platform), Some(filename)) => join_url(&[&base, platform, filename]),
            (Some(platform), None) => join_url(&[&base, platform]),
            (None, _) => join_url(&[&base, NOARCH]),
        };
        self.build_url(&full, with_credential)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name)
    }
}
