//! CLI configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/wisty/wisty.toml`
//! - Windows: `%APPDATA%/wisty/wisty.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wisty_file_lifecycle::TransferTuning;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Answer large-file confirmations with yes by default.
    #[serde(default)]
    pub confirm_large_files: bool,

    #[serde(default)]
    pub transfer: TransferTuning,
}

impl Config {
    /// Loads from `path` (or the platform default), writing defaults if the
    /// file does not exist yet.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("wisty").join("wisty.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("wisty")
            .join("wisty.toml")
    }
}
