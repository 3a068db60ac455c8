//! Configuration management for Latchkey
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (LATCHKEY_* prefix, highest precedence)
//! 2. latchkey.local.toml (gitignored, local overrides)
//! 3. latchkey.toml (git-tracked, project config)
//! 4. ~/.config/latchkey/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Upper bound on how long a single access request may be granted for.
pub const MAX_REQUEST_VALIDITY_SECS: u64 = 86_400;

/// Upper bound on delegation chain depth.
pub const MAX_DELEGATION_DEPTH: u8 = 5;

/// Main Latchkey configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatchkeyConfig {
    pub access: AccessConfig,
    pub delegation: DelegationConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Subjects allowed to administer any policy, delegation or grant.
    pub admins: Vec<String>,
    pub max_request_validity_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            max_request_validity_secs: MAX_REQUEST_VALIDITY_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    pub max_validity_secs: u64,
    pub max_depth: u8,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_validity_secs: 30 * 86_400,
            max_depth: MAX_DELEGATION_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Events buffered between decision workers and the sink writer.
    pub queue_capacity: usize,
    pub retry: BackoffConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            retry: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff for retrying audit sink appends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry (milliseconds).
    pub initial_delay_ms: u64,
    /// Maximum delay between retries (milliseconds).
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after failed attempt `attempt` (0-indexed).
    ///
    /// Returns `None` once `max_attempts` is reached.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }

        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        Some(Duration::from_millis(capped_delay as u64))
    }
}

impl LatchkeyConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Checks that every value lies in its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let access = &self.access;
        if access.max_request_validity_secs == 0
            || access.max_request_validity_secs > MAX_REQUEST_VALIDITY_SECS
        {
            return Err(ConfigError::ValidationError(format!(
                "access.max_request_validity_secs must be in 1..={MAX_REQUEST_VALIDITY_SECS}, got {}",
                access.max_request_validity_secs
            )));
        }
        if access.admins.iter().any(|admin| admin.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "access.admins contains an empty subject".to_string(),
            ));
        }

        let delegation = &self.delegation;
        if delegation.max_validity_secs == 0 {
            return Err(ConfigError::ValidationError(
                "delegation.max_validity_secs must be positive".to_string(),
            ));
        }
        if !(1..=MAX_DELEGATION_DEPTH).contains(&delegation.max_depth) {
            return Err(ConfigError::ValidationError(format!(
                "delegation.max_depth must be in 1..={MAX_DELEGATION_DEPTH}, got {}",
                delegation.max_depth
            )));
        }

        let audit = &self.audit;
        if audit.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "audit.queue_capacity must be positive".to_string(),
            ));
        }
        let retry = &audit.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "audit.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "audit.retry.multiplier must be a finite value >= 1, got {}",
                retry.multiplier
            )));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "audit.retry.initial_delay_ms ({}) exceeds max_delay_ms ({})",
                retry.initial_delay_ms, retry.max_delay_ms
            )));
        }
        Ok(())
    }
}
