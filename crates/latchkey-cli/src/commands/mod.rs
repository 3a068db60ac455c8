//! CLI command implementations.

pub mod check;
pub mod config;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result, bail};
use latchkey_abac::Policy;

/// Reads a JSON array of policies.
pub fn read_policies(path: &Path) -> Result<Vec<Policy>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse policies in {}", path.display()))
}

/// Splits a `KEY=VALUE` argument.
pub fn parse_pair(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got '{raw}'");
    };
    if key.trim().is_empty() {
        bail!("empty key in '{raw}'");
    }
    Ok((key.trim().to_string(), value.to_string()))
}
