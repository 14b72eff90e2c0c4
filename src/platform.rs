// src/platform.rs

//! Conda platform (subdir) identifiers
//!
//! A channel is split into one subdirectory per platform plus `noarch`.
//! Platform detection in channel URLs only ever matches a whole path
//! segment against [`KNOWN_PLATFORMS`].

/// Platform-independent subdirectory present in every channel
pub const NOARCH: &str = "noarch";

/// Every subdirectory name a channel URL may end with
pub const KNOWN_PLATFORMS: &[&str] = &[
    "noarch",
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64",
    "linux-ppc64le",
    "linux-s390x",
    "osx-64",
    "osx-arm64",
    "win-32",
    "win-64",
    "win-arm64",
    "zos-z",
    "emscripten-wasm32",
    "wasi-wasm32",
];

/// Platform this binary was built for
pub const fn host_platform() -> &'static str {
    if cfg!(target_os = "linux") {
        if cfg!(target_arch = "x86_64") {
            "linux-64"
        } else if cfg!(target_arch = "x86") {
            "linux-32"
        } else if cfg!(target_arch = "aarch64") {
            "linux-aarch64"
        } else if cfg!(target_arch = "arm") {
            "linux-armv7l"
        } else if cfg!(all(target_arch = "powerpc64", target_endian = "little")) {
            "linux-ppc64le"
        } else if cfg!(target_arch = "powerpc64") {
            "linux-ppc64"
        } else if cfg!(target_arch = "s390x") {
            "linux-s390x"
        } else {
            "linux-64"
        }
    } else if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            "osx-arm64"
        } else {
            "osx-64"
        }
    } else if cfg!(target_os = "windows") {
        if cfg!(target_arch = "aarch64") {
            "win-arm64"
        } else if cfg!(target_arch = "x86") {
            "win-32"
        } else {
            "win-64"
        }
    } else {
        NOARCH
    }
}

/// Check whether a string is a known platform identifier
pub fn is_known_platform(value: &str) -> bool {
    KNOWN_PLATFORMS.contains(&value)
}

/// Return the platform named by the trailing path segment of `url`, if any
pub fn trailing_platform(url: &str) -> Option<&'static str> {
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    KNOWN_PLATFORMS.iter().copied().find(|p| *p == last)
}

/// Default platform list: the configured platform plus `noarch`
pub fn default_platforms(platform: &str) -> Vec<String> {
    if platform == NOARCH {
        vec![NOARCH.to_string()]
    } else {
        vec![platform.to_string(), NOARCH.to_string()]
    }
}
