//! CLI configuration management.
//!
//! Configuration is stored as TOML in `bytelift/config.toml` under the
//! user's configuration directory (`~/.config` on Linux, `%APPDATA%` on
//! Windows). There is no fallback outside the user's own directories.
//!
//! `BYTELIFT_API_KEY` overrides the stored API key.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bytelift_upload::DEFAULT_BASE_URL;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides [`Config::api_key`].
pub const API_KEY_ENV: &str = "BYTELIFT_API_KEY";

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Secret or public API key.
    #[serde(default)]
    pub api_key: String,

    /// Account that receives the uploads.
    #[serde(default)]
    pub account_id: String,

    /// API origin.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Parts uploaded at once for seekable sources.
    #[serde(default = "default_max_concurrent_upload_parts")]
    pub max_concurrent_upload_parts: usize,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_max_concurrent_upload_parts() -> usize {
    bytelift_transfer::DEFAULT_MAX_CONCURRENT_UPLOAD_PARTS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            account_id: String::new(),
            base_url: default_base_url(),
            max_concurrent_upload_parts: default_max_concurrent_upload_parts(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location is created with defaults.
    /// An explicit path must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = config_path()?;
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    let config = Config::default();
                    config.save_to(&path)?;
                    config
                }
            }
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file holds an API key.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies environment overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.api_key = key;
        }
        self
    }

    /// Checks that the settings needed to upload are present.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("no API key configured; set api_key or {API_KEY_ENV}");
        }
        if self.account_id.is_empty() {
            anyhow::bail!("no account_id configured");
        }
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    config_path_in(dirs::config_dir())
}

fn config_path_in(config_dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let Some(dir) = config_dir else {
        anyhow::bail!("no user configuration directory found; pass --config");
    };
    Ok(dir.join("bytelift").join("config.toml"))
}
