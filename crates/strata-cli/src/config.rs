//! Configuration file support for the CLI.
//!
//! Loads and saves CLI configuration from TOML files. The `[store]` table
//! holds the store configuration passed to every opened database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use strata_common::config::StoreConfig;

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Database file used when no `--database` flag is given.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Default output format.
    #[serde(default = "default_format")]
    pub output_format: String,

    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_format() -> String {
    "table".to_string()
}

impl CliConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config
            .store
            .validate()
            .map_err(|message| anyhow::anyhow!("invalid store configuration: {message}"))?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Loads `~/.config/strata/config.toml` if it exists, else defaults.
    pub fn load_default() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self {
                output_format: default_format(),
                ..Self::default()
            }),
        }
    }

    /// Returns the default configuration file path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("strata").join("config.toml"))
    }
}
