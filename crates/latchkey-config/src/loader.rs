//! Configuration loader with multi-source merging

use crate::{LatchkeyConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "LATCHKEY".to_string(),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "LATCHKEY")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/latchkey/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// TOML files in increasing precedence; missing files are skipped.
    fn file_layers(&self) -> Vec<PathBuf> {
        let user = self
            .user_config
            .then(|| Paths::new().user_config_file().ok())
            .flatten();
        user.into_iter()
            .chain([
                Paths::project_config_file(&self.project_dir),
                Paths::local_config_file(&self.project_dir),
            ])
            .filter(|path| path.exists())
            .collect()
    }

    /// Merges defaults, user file, project file, local file and environment
    /// (later sources win), then validates the result.
    pub fn load(self) -> Result<LatchkeyConfig> {
        let defaults = config::Config::try_from(&LatchkeyConfig::default())
            .context("Failed to encode default configuration")?;
        let mut builder = config::Config::builder().add_source(defaults);

        for path in self.file_layers() {
            builder = builder.add_source(
                config::File::from(path)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // LATCHKEY_SECTION__KEY, e.g. LATCHKEY_AUDIT__QUEUE_CAPACITY=64
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("access.admins")
                .try_parsing(true),
        );

        let merged: LatchkeyConfig = builder
            .build()
            .and_then(config::Config::try_deserialize)
            .context("Failed to merge configuration sources")?;
        merged
            .validate()
            .context("Configuration failed validation")?;

        Ok(merged)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> LatchkeyConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
