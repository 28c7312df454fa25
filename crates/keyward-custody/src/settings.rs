//! Backup settings

use std::path::{Path, PathBuf};

use keyward_core::{BackupAlgorithms, SecretConfig};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings file name under the config directory
const SETTINGS_FILE: &str = "settings.json";

/// Secret sharing and encryption choices for new backups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Share count, threshold, field, and key length
    #[serde(default)]
    pub secret: SecretConfig,

    /// KDF, hash, cipher, and KDF cost
    #[serde(default)]
    pub algorithms: BackupAlgorithms,
}

impl BackupSettings {
    /// Platform-appropriate default settings path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keyward")
            .join(SETTINGS_FILE)
    }

    /// Load settings from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` if given, else the default path if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save settings to file, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        keyward_core::storage::write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.secret.validate()?;
        self.algorithms.validate()?;
        Ok(())
    }
}
