//! ConfigStore - Settings Source of Truth
//!
//! ## Responsibilities
//!
//! - Vendor platform credentials
//! - Vacancy threshold
//! - Per-slot device binding, display name, background image
//! - Settings persistence (JSON file)
//!
//! Reads come from the in-memory cache. Updates are applied to a copy,
//! written to disk, then committed to the cache, so a failed write leaves
//! the cache unchanged.

mod repository;
mod types;

pub use repository::SettingsRepository;
pub use types::*;

use crate::device_state::SlotConfig;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// ConfigStore instance
pub struct ConfigStore {
    repo: SettingsRepository,
    slot_count: usize,
    /// In-memory cache for frequent reads
    cache: Arc<RwLock<Settings>>,
    /// Serializes slot updates that are mirrored into the live engine
    slot_writes: Mutex<()>,
}

impl ConfigStore {
    /// Open the settings file, falling back to defaults
    pub async fn open(path: impl Into<PathBuf>, slot_count: usize) -> Self {
        let repo = SettingsRepository::new(path);
        let mut settings = repo
            .load()
            .await
            .unwrap_or_else(|| Settings::with_slot_count(slot_count));
        settings.normalize(slot_count);

        tracing::info!(
            path = %repo.path().display(),
            bound = settings.devices.iter().filter(|d| !d.device_id.trim().is_empty()).count(),
            vacant_time_minutes = settings.vacant_time_minutes,
            "ConfigStore loaded"
        );

        Self {
            repo,
            slot_count,
            cache: Arc::new(RwLock::new(settings)),
            slot_writes: Mutex::new(()),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Get cached settings (fast read)
    pub async fn settings(&self) -> Settings {
        self.cache.read().await.clone()
    }

    /// Settings with the client secret masked
    pub async fn masked(&self) -> Settings {
        self.cache.read().await.masked()
    }

    pub async fn vacant_time_minutes(&self) -> u32 {
        self.cache.read().await.vacant_time_minutes
    }

    pub async fn devices(&self) -> Vec<SlotConfig> {
        self.cache.read().await.devices.clone()
    }

    pub async fn device(&self, index: usize) -> Result<SlotConfig> {
        self.check_index(index)?;
        Ok(self.cache.read().await.devices[index].clone())
    }

    /// Update credentials and/or vacancy threshold
    ///
    /// The masked placeholder is never written back as the secret.
    pub async fn update_common(&self, req: UpdateCommonRequest) -> Result<Settings> {
        if let Some(minutes) = req.vacant_time_minutes {
            if !VACANT_TIME_RANGE.contains(&minutes) {
                return Err(Error::Validation(format!(
                    "vacant_time_minutes must be {}-{}",
                    VACANT_TIME_RANGE.start(),
                    VACANT_TIME_RANGE.end()
                )));
            }
        }

        self.update(|settings| {
            if let Some(client_id) = req.client_id {
                settings.client_id = client_id.trim().to_string();
            }
            if let Some(secret) = req.client_secret {
                if secret != MASKED_SECRET {
                    settings.client_secret = secret;
                }
            }
            if let Some(minutes) = req.vacant_time_minutes {
                settings.vacant_time_minutes = minutes;
            }
            Ok(())
        })
        .await
    }

    /// Hold while persisting a slot change and applying it to the engine,
    /// so both see slot updates in the same order
    pub async fn lock_slots(&self) -> MutexGuard<'_, ()> {
        self.slot_writes.lock().await
    }

    /// Update one slot's device id and/or display name
    pub async fn update_device(&self, index: usize, req: UpdateDeviceRequest) -> Result<SlotConfig> {
        self.check_index(index)?;

        let settings = self
            .update(|settings| {
                if let Some(device_id) = req.device_id.as_deref().map(str::trim) {
                    if !device_id.is_empty() {
                        let taken = settings
                            .devices
                            .iter()
                            .enumerate()
                            .find(|(i, d)| *i != index && d.device_id.trim() == device_id);
                        if let Some((other, _)) = taken {
                            return Err(Error::Conflict(format!(
                                "Device {} is already bound to slot {}",
                                device_id, other
                            )));
                        }
                    }
                    settings.devices[index].device_id = device_id.to_string();
                }
                if let Some(name) = req.display_name {
                    settings.devices[index].display_name = name;
                }
                Ok(())
            })
            .await?;

        Ok(settings.devices[index].clone())
    }

    /// Record a slot's background image path
    pub async fn set_background(&self, index: usize, background_image: &str) -> Result<()> {
        self.check_index(index)?;
        self.update(|settings| {
            settings.devices[index].background_image = background_image.to_string();
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn update<F>(&self, apply: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let mut cache = self.cache.write().await;
        let mut next = cache.clone();
        apply(&mut next)?;

        self.repo.save(&next).await?;
        *cache = next.clone();

        Ok(next)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.slot_count {
            return Err(Error::Validation(format!(
                "Invalid device index: {} (0-{})",
                index,
                self.slot_count.saturating_sub(1)
            )));
        }
        Ok(())
    }
}
