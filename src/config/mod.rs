// src/config/mod.rs
mod cli;
mod models;

pub use cli::Cli;
pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Build the effective configuration: optional file first, then CLI overrides.
pub async fn resolve(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => read_config(path).await?,
        None => Config::default(),
    };

    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Read a config file (YAML or JSON by extension) without validating it.
async fn read_config(path: &Path) -> Result<Config> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(path, &contents)
}

fn parse_config(path: &Path, contents: &str) -> Result<Config> {
    let ext = path.extension().and_then(|s| s.to_str());
    let config = if ext == Some("yaml") || ext == Some("yml") {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };
    Ok(config)
}
