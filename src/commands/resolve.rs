// src/commands/resolve.rs
//! Single channel inspection

use anyhow::Result;
use condafetch::Config;

/// Show the fields of a resolved channel
pub fn cmd_resolve(config: &Config, spec: &str) -> Result<()> {
    let resolver = super::resolver(config);
    let channel = resolver.resolve(spec)?;

    println!("Channel: {}", channel.canonical_name());
    println!("  Scheme: {}", channel.scheme());
    println!("  Location: {}", channel.location());
    println!("  Name: {}", channel.name());
    if let Some(platform) = channel.platform() {
        println!("  Platform: {}", platform);
    }
    if let Some(filename) = channel.package_filename() {
        println!("  Package: {}", filename);
    }
    println!("  Auth: {}", if channel.auth().is_some() { "yes" } else { "no" });
    println!("  Token: {}", if channel.token().is_some() { "yes" } else { "no" });
    println!("  Base URL: {}", channel.base_url());

    println!("  URLs:");
    for url in channel.urls(resolver.context().platforms(), false) {
        println!("    {}", url);
    }
    Ok(())
}
