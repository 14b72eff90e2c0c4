// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: channel names
fn names_arg() -> Arg {
    Arg::new("names")
        .num_args(0..)
        .help("Channel names (default: configured channels)")
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn build_cli() -> Command {
    Command::new("condafetch")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Condafetch Contributors")
        .about("Resolve conda channels and download packages concurrently")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file (default: ~/.config/condafetch/config.toml)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Suppress progress output"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("channels")
                .about("Print the URLs of resolved channels")
                .arg(names_arg())
                .arg(
                    Arg::new("platform")
                        .short('p')
                        .long("platform")
                        .help("Target platform (default: configured platform)"),
                )
                .arg(flag("with-credentials", "Include user/password and token in the URLs"))
                .arg(flag("use-local", "Prepend the local conda-bld channels"))
                .arg(flag(
                    "append-config-channels",
                    "Append the channels from the configuration file",
                )),
        )
        .subcommand(
            Command::new("resolve")
                .about("Show how a single channel specification resolves")
                .arg(
                    Arg::new("spec")
                        .required(true)
                        .help("Channel name, URL, path or package file"),
                ),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download files concurrently")
                .arg(
                    Arg::new("urls")
                        .required(true)
                        .num_args(1..)
                        .help("URLs to download"),
                )
                .arg(
                    Arg::new("dest")
                        .short('d')
                        .long("dest")
                        .default_value(".")
                        .help("Destination directory"),
                )
                .arg(Arg::new("sha256").long("sha256").help("Expected SHA-256 (only with a single URL)"))
                .arg(Arg::new("size").long("size").help("Expected size in bytes (only with a single URL)"))
                .arg(flag("fail-fast", "Stop at the first failed download")),
        )
        .subcommand(
            Command::new("repodata")
                .about("Fetch or revalidate repodata.json for channels")
                .arg(names_arg())
                .arg(
                    Arg::new("cache_dir")
                        .long("cache-dir")
                        .required(true)
                        .help("Cache directory for repodata and its state files"),
                )
                .arg(flag("refresh", "Always revalidate, ignoring cache freshness")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("condafetch.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
