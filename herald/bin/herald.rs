#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;

/// Resilient email and SMS notification delivery
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Deliver scheduled email and SMS notifications", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the RON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config)?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let herald: herald::Herald = ron::from_str(&config_content)?;

    herald.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `--config` command-line flag
/// 2. `HERALD_CONFIG` environment variable
/// 3. ./herald.config.ron (current working directory)
/// 4. /etc/herald/herald.config.ron (system-wide config)
fn find_config_file(flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = flag {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("HERALD_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "HERALD_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = vec![
        PathBuf::from("./herald.config.ron"),
        PathBuf::from("/etc/herald/herald.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config flag\n  - HERALD_CONFIG environment variable\n{paths_tried}"
    )
}
