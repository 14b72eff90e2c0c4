// src/channel/tokens.rs

//! Anaconda client token discovery
//!
//! Token files are named after the URL-encoded server URL they belong to,
//! e.g. `https%3A%2F%2Fapi.anaconda.org.token`, and contain the bare token.
//! The client writes tokens for the `api.` host but packages are served from
//! the `conda.` host, so the host is rewritten before association.

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::url::{decode_url, expand_user};

const TOKEN_SUFFIX: &str = ".token";

/// Map a token file name to the `scheme://location` it authenticates
pub fn token_url_from_filename(filename: &str) -> Option<String> {
    if !filename.ends_with(TOKEN_SUFFIX) {
        return None;
    }

    let decoded = decode_url(filename);
    let decoded = decoded.replacen("://api.", "://conda.", 1);
    decoded
        .strip_suffix(TOKEN_SUFFIX)
        .map(|url| url.trim_end_matches('/').to_string())
}

/// Scan token directories, returning `scheme://location` -> token
///
/// Missing directories are skipped. Unreadable files are logged and skipped.
pub fn load_tokens<S: AsRef<str>>(locations: &[S]) -> HashMap<String, String> {
    let mut tokens = HashMap::new();

    for location in locations {
        let dir = expand_user(location.as_ref());
        if !dir.is_dir() {
            debug!("Token location {} does not exist", dir.display());
            continue;
        }

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read token directory {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(url) = token_url_from_filename(&filename) else {
                continue;
            };

            match read_token(&entry.path()) {
                Some(token) => {
                    info!("Found token for {}", url);
                    tokens.insert(url, token);
                }
                None => warn!("Ignoring empty or unreadable token file {}", filename),
            }
        }
    }

    tokens
}

fn read_token(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let token = content.trim();
    (!token.is_empty()).then(|| token.to_string())
}
