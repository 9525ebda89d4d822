//! Persisted UI preferences.
//!
//! Only the theme and sidebar survive a restart; everything else in the
//! store is session state. Stored as TOML under the OS config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedPrefs {
    pub theme: Theme,
    pub sidebar_open: bool,
}

impl Default for PersistedPrefs {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            sidebar_open: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("could not find config directory")]
    NoConfigDir,
    #[error("prefs file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid prefs file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize prefs: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl PersistedPrefs {
    /// `<config dir>/legal-ai-dashboard/prefs.toml`
    pub fn default_path() -> Result<PathBuf, PrefsError> {
        let mut path = dirs::config_dir().ok_or(PrefsError::NoConfigDir)?;
        path.push("legal-ai-dashboard");
        path.push("prefs.toml");
        Ok(path)
    }

    /// Missing file = first run = defaults.
    pub async fn load(path: &Path) -> Result<Self, PrefsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&content)?)
    }

    pub async fn save(&self, path: &Path) -> Result<(), PrefsError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
