// src/url.rs

//! URL utilities for channel specifications and package URLs
//!
//! All functions here are pure string algorithms. Parsing failures are
//! reported by returning `None` or an empty string, never by panicking, so
//! the resolver decides which failures are fatal.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use url::Url;

use crate::platform;

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]{0,11}://").expect("valid scheme regex"));

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\./|\.\.|~|/|[a-zA-Z]:[/\\]|\\\\|//)").expect("valid path regex")
});

// A `/t/<token>` segment; the trailing group anchors it to a segment boundary.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/t/([a-zA-Z0-9_-]+)(/|$)").expect("valid token regex"));

/// Archive suffixes recognized as conda packages
pub const PACKAGE_EXTENSIONS: &[&str] = &[".tar.bz2", ".conda"];

/// Check whether a string starts with a URL scheme (`https://`, `file://`, ...)
pub fn has_scheme(value: &str) -> bool {
    SCHEME_RE.is_match(value)
}

/// Check whether a string looks like a filesystem path
pub fn is_path(value: &str) -> bool {
    !has_scheme(value) && PATH_RE.is_match(value)
}

/// Check whether a string names a package archive
pub fn is_package_file(value: &str) -> bool {
    PACKAGE_EXTENSIONS.iter().any(|ext| value.ends_with(ext))
}

/// Split a package archive name into (stem, extension)
///
/// Returns the input unchanged with an empty extension if it is not an
/// archive name.
pub fn split_package_extension(value: &str) -> (&str, &str) {
    for ext in PACKAGE_EXTENSIONS {
        if let Some(stem) = value.strip_suffix(ext) {
            return (stem, &value[stem.len()..]);
        }
    }
    (value, "")
}

/// Join URL segments with single slashes, skipping empty segments
pub fn join_url(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if out.is_empty() {
            out.push_str(part);
        } else {
            while out.ends_with('/') {
                out.pop();
            }
            out.push('/');
            out.push_str(part.trim_start_matches('/'));
        }
    }
    out
}

/// Expand a leading `~` to the user's home directory
pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Lexically normalize a path (resolve `.` and `..` without touching the disk)
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Convert a local path to a `file://` URL
///
/// Returns an empty string if the path cannot be made absolute.
pub fn path_to_url(path: &str) -> String {
    let expanded = expand_user(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => return String::new(),
        }
    };

    Url::from_file_path(normalize(&absolute))
        .map(|u| u.to_string().trim_end_matches('/').to_string())
        .unwrap_or_default()
}

/// Remove an embedded `/t/<token>` segment, returning (cleaned url, token)
pub fn split_anaconda_token(url: &str) -> (String, Option<String>) {
    let Some(caps) = TOKEN_RE.captures(url) else {
        return (url.trim_end_matches('/').to_string(), None);
    };
    let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
        return (url.trim_end_matches('/').to_string(), None);
    };

    // Drop "/t/<token>" and keep whatever followed the segment
    let tail_start = token.end();
    let cleaned = format!("{}{}", &url[..whole.start()], &url[tail_start..]);
    (
        cleaned.trim_end_matches('/').to_string(),
        Some(token.as_str().to_string()),
    )
}

/// URL split into scheme, credential-free remainder, inline auth and token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemeAuthToken {
    /// Everything after `scheme://[auth@]` with the token removed
    pub remainder: String,
    pub scheme: String,
    pub auth: Option<String>,
    pub token: Option<String>,
}

/// Split a URL into remainder, scheme, auth and token
///
/// A string without a scheme is returned whole as the remainder.
pub fn split_scheme_auth_token(url: &str) -> SchemeAuthToken {
    let (cleaned, token) = split_anaconda_token(url);

    let (scheme, rest) = match cleaned.split_once("://") {
        Some((scheme, rest)) if has_scheme(&cleaned) => (scheme.to_string(), rest.to_string()),
        _ => (String::new(), cleaned.clone()),
    };

    // Credentials can only live in the authority section
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (auth, remainder) = match rest[..authority_end].rfind('@') {
        Some(at) => (
            Some(rest[..at].to_string()),
            rest[at + 1..].to_string(),
        ),
        None => (None, rest),
    };

    SchemeAuthToken {
        remainder: remainder.trim_end_matches('/').to_string(),
        scheme,
        auth: auth.filter(|a| !a.is_empty()),
        token,
    }
}

/// Remove inline credentials and tokens from a URL
pub fn strip_credentials(url: &str) -> String {
    let split = split_scheme_auth_token(url);
    if split.scheme.is_empty() {
        split.remainder
    } else {
        format!("{}://{}", split.scheme, split.remainder)
    }
}

/// Percent/plus-decode a URL-encoded string (token file names)
pub fn decode_url(value: &str) -> String {
    url::form_urlencoded::parse(value.as_bytes())
        .map(|(key, val)| {
            if val.is_empty() {
                key.into_owned()
            } else {
                format!("{key}={val}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Structural components of an absolute URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub auth: Option<String>,
}

impl UrlParts {
    /// Parse an absolute URL
    pub fn parse(value: &str) -> Option<Self> {
        let parsed = Url::parse(value).ok()?;
        let auth = match (parsed.username(), parsed.password()) {
            ("", None) => None,
            (user, Some(password)) => Some(format!("{user}:{password}")),
            (user, None) => Some(user.to_string()),
        };

        Some(Self {
            scheme: parsed.scheme().to_string(),
            host: parsed.host_str().unwrap_or_default().to_string(),
            port: parsed.port(),
            path: parsed.path().to_string(),
            auth,
        })
    }

    /// `host[:port]`
    pub fn host_port(&self) -> String {
        host_port(&self.host, self.port)
    }
}

/// Format `host[:port]`
pub fn host_port(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// A channel or package URL broken into the pieces the resolver needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CondaUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Channel path, without platform, token or package filename
    pub path: String,
    pub auth: Option<String>,
    pub token: Option<String>,
    pub platform: Option<String>,
    pub package_filename: Option<String>,
}

/// Split a conda URL into scheme, host, port, path, auth, token, platform
/// and package filename
pub fn split_conda_url(url: &str) -> Option<CondaUrl> {
    let (mut cleaned, token) = split_anaconda_token(url);

    let mut package_filename = None;
    if is_package_file(&cleaned) {
        if let Some((rest, filename)) = cleaned.rsplit_once('/') {
            package_filename = Some(filename.to_string());
            cleaned = rest.to_string();
        }
    }

    let mut platform = None;
    if let Some(found) = platform::trailing_platform(&cleaned) {
        platform = Some(found.to_string());
        let trimmed = cleaned.trim_end_matches('/');
        cleaned = trimmed[..trimmed.len() - found.len()]
            .trim_end_matches('/')
            .to_string();
    }

    let parts = UrlParts::parse(&cleaned)?;
    Some(CondaUrl {
        scheme: parts.scheme,
        host: parts.host,
        port: parts.port,
        path: parts.path,
        auth: parts.auth,
        token,
        platform,
        package_filename,
    })
}

/// Last path segment of a URL (the file name a download would get)
pub fn url_filename(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
}
