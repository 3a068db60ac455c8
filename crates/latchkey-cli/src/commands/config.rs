//! Configuration display.

use std::path::Path;

use anyhow::{Context, Result};
use latchkey_config::LatchkeyConfig;

/// Show the effective configuration.
pub fn show(project: &Path) -> Result<()> {
    let config = LatchkeyConfig::load_from_dir(project).context("Failed to load configuration")?;
    print!("{}", config.to_toml()?);
    Ok(())
}
