//! BackgroundStore - Slot Background Images
//!
//! Images live under `{static_dir}/images` and are referenced from settings
//! by their path relative to the static dir (`images/device_{index}_{ts}.jpg`).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Accepted upload extensions
pub const ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png"];

const IMAGES_DIR: &str = "images";

/// BackgroundStore instance
pub struct BackgroundStore {
    static_dir: PathBuf,
}

impl BackgroundStore {
    pub fn new(static_dir: impl Into<PathBuf>) -> Self {
        Self {
            static_dir: static_dir.into(),
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.static_dir.join(IMAGES_DIR)
    }

    /// Lowercased extension (with dot) of an uploaded file name, if accepted
    pub fn accepted_extension(filename: &str) -> Result<String> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();

        if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            Ok(ext)
        } else {
            Err(Error::Validation(format!(
                "Unsupported image type '{}': only JPG and PNG are accepted",
                filename
            )))
        }
    }

    /// Write image bytes for a slot; returns the path relative to the static dir
    pub async fn save(
        &self,
        index: usize,
        ext: &str,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<String> {
        if data.is_empty() {
            return Err(Error::Validation("Image data is empty".to_string()));
        }

        let images_dir = self.images_dir();
        fs::create_dir_all(&images_dir).await?;

        let filename = format!("device_{}_{}{}", index, now.format("%Y%m%d%H%M%S"), ext);
        fs::write(images_dir.join(&filename), data).await?;

        tracing::info!(slot = index, filename = %filename, bytes = data.len(), "Background image saved");

        Ok(format!("{}/{}", IMAGES_DIR, filename))
    }
}
