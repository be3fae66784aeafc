//! ConfigStore Repository
//!
//! Settings file access layer

use super::types::Settings;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// JSON settings file
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    path: PathBuf,
}

impl SettingsRepository {
    /// Create new repository
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; `None` when the file does not exist or cannot be parsed
    pub async fn load(&self) -> Option<Settings> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Settings file not found, using defaults");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read settings file");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Corrupt settings file, using defaults");
                None
            }
        }
    }

    /// Write settings as pretty JSON, creating the parent directory
    pub async fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, json).await?;

        tracing::debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}
