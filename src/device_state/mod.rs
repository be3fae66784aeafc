//! DeviceStateEngine - Slot Registry and Occupancy
//!
//! ## Responsibilities
//!
//! - Fixed-size registry of monitored slots and the device_id -> slot index
//! - Ingest of decoded detection sets (people count, last detection time)
//! - Connectivity facts from the device platform
//! - Occupancy classification and snapshot composition
//!
//! A single RwLock guards slots and index together, so readers never see a
//! slot whose detections and people count disagree, or a half-moved binding.

mod types;

pub use types::*;

use crate::detection_decoder::DetectionSet;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Outcome of mapping a raw (possibly suffix-only) device id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Bound canonical id
    Bound(String),
    /// No bound id matches
    Unknown,
    /// Suffix matches more than one bound id
    Ambiguous(Vec<String>),
}

#[derive(Debug, Default)]
struct Registry {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl Registry {
    fn build(slot_count: usize, configs: &[SlotConfig]) -> Self {
        let mut registry = Registry {
            slots: Vec::with_capacity(slot_count),
            index: HashMap::new(),
        };

        for position in 0..slot_count {
            let mut slot = configs
                .get(position)
                .map(Slot::from_config)
                .unwrap_or_default();

            if let Some(device_id) = slot.device_id.clone() {
                if let Some(existing) = registry.index.get(&device_id) {
                    tracing::warn!(
                        device_id = %device_id,
                        slot = position,
                        bound_slot = *existing,
                        "Duplicate device id in slot config, leaving slot unbound"
                    );
                    slot.device_id = None;
                } else {
                    registry.index.insert(device_id, position);
                }
            }

            registry.slots.push(slot);
        }

        if configs.len() > slot_count {
            tracing::warn!(
                configured = configs.len(),
                slot_count = slot_count,
                "Ignoring slot configs beyond slot count"
            );
        }

        registry
    }

    fn resolve(&self, raw_device_id: &str) -> Resolution {
        if raw_device_id.is_empty() {
            return Resolution::Unknown;
        }

        if raw_device_id.starts_with(CANONICAL_ID_PREFIX) {
            return if self.index.contains_key(raw_device_id) {
                Resolution::Bound(raw_device_id.to_string())
            } else {
                Resolution::Unknown
            };
        }

        let mut matches: Vec<String> = self
            .index
            .keys()
            .filter(|id| id.ends_with(raw_device_id))
            .cloned()
            .collect();

        match matches.len() {
            0 => Resolution::Unknown,
            1 => Resolution::Bound(matches.remove(0)),
            _ => {
                matches.sort();
                Resolution::Ambiguous(matches)
            }
        }
    }
}

/// DeviceStateEngine instance
pub struct DeviceStateEngine {
    slot_count: usize,
    registry: RwLock<Registry>,
}

impl DeviceStateEngine {
    /// Create engine with `slot_count` unbound slots
    pub fn new(slot_count: usize) -> Self {
        Self::with_slots(slot_count, &[])
    }

    /// Create engine from startup configuration
    pub fn with_slots(slot_count: usize, configs: &[SlotConfig]) -> Self {
        Self {
            slot_count,
            registry: RwLock::new(Registry::build(slot_count, configs)),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Reinitialize every slot and rebuild the reverse index
    pub async fn configure_slots(&self, configs: &[SlotConfig]) {
        let fresh = Registry::build(self.slot_count, configs);
        let bound = fresh.index.len();
        *self.registry.write().await = fresh;

        tracing::info!(slot_count = self.slot_count, bound = bound, "Slots configured");
    }

    /// Change a slot's binding and/or display name in place
    ///
    /// An empty device id unbinds the slot. Binding an id that another slot
    /// already holds is rejected.
    pub async fn rebind_slot(
        &self,
        position: usize,
        new_device_id: Option<&str>,
        new_display_name: Option<&str>,
    ) -> Result<()> {
        let mut registry = self.registry.write().await;
        let Registry { slots, index } = &mut *registry;

        let slot = slots
            .get_mut(position)
            .ok_or_else(|| Error::Validation(format!("Invalid slot index: {}", position)))?;

        if let Some(new_id) = new_device_id.map(str::trim) {
            let new_id = (!new_id.is_empty()).then(|| new_id.to_string());

            if new_id != slot.device_id {
                if let Some(id) = &new_id {
                    if let Some(&other) = index.get(id) {
                        return Err(Error::Conflict(format!(
                            "Device {} is already bound to slot {}",
                            id, other
                        )));
                    }
                }

                if let Some(old) = slot.device_id.take() {
                    index.remove(&old);
                }
                if let Some(id) = &new_id {
                    index.insert(id.clone(), position);
                }

                tracing::info!(
                    slot = position,
                    device_id = ?new_id,
                    "Slot rebound"
                );
                slot.device_id = new_id;
                slot.reset_observations();
            }
        }

        if let Some(name) = new_display_name {
            slot.display_name = name.to_string();
        }

        Ok(())
    }

    /// Replace a slot's background image reference
    pub async fn set_background(&self, position: usize, background_image: &str) -> Result<()> {
        let mut registry = self.registry.write().await;
        let slot = registry
            .slots
            .get_mut(position)
            .ok_or_else(|| Error::Validation(format!("Invalid slot index: {}", position)))?;
        slot.background_image = background_image.to_string();
        Ok(())
    }

    /// Apply a connectivity fact; returns false when the id is unbound
    pub async fn update_connectivity(
        &self,
        device_id: &str,
        connected: bool,
        mode: StreamingMode,
        now: DateTime<Utc>,
    ) -> bool {
        let mut registry = self.registry.write().await;
        let Some(&position) = registry.index.get(device_id) else {
            tracing::debug!(device_id = %device_id, "Connectivity for unbound device ignored");
            return false;
        };

        registry.slots[position].apply_connectivity(connected, mode, now);
        true
    }

    /// Record the outcome of an explicit inference start/stop command
    pub async fn set_inference_active(&self, device_id: &str, active: bool) -> bool {
        let mut registry = self.registry.write().await;
        let Some(&position) = registry.index.get(device_id) else {
            return false;
        };
        registry.slots[position].inference_active = active;
        true
    }

    pub async fn is_inference_active(&self, device_id: &str) -> bool {
        let registry = self.registry.read().await;
        registry
            .index
            .get(device_id)
            .map(|&position| registry.slots[position].inference_active)
            .unwrap_or(false)
    }

    /// Currently bound canonical ids in slot order
    pub async fn bound_device_ids(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .slots
            .iter()
            .filter_map(|slot| slot.device_id.clone())
            .collect()
    }

    /// Map a raw id from an inbound push to a bound canonical id
    pub async fn resolve_device_id(&self, raw_device_id: &str) -> Resolution {
        self.registry.read().await.resolve(raw_device_id)
    }

    /// Replace the bound slot's detections; returns the slot updated
    ///
    /// Never fails: unknown or ambiguous ids are dropped with a log entry.
    pub async fn ingest(
        &self,
        raw_device_id: &str,
        detections: DetectionSet,
        now: DateTime<Utc>,
    ) -> Option<usize> {
        let mut registry = self.registry.write().await;

        let device_id = match registry.resolve(raw_device_id) {
            Resolution::Bound(id) => id,
            Resolution::Unknown => {
                tracing::warn!(device_id = %raw_device_id, "Ingest for unknown device dropped");
                return None;
            }
            Resolution::Ambiguous(candidates) => {
                tracing::warn!(
                    device_id = %raw_device_id,
                    candidates = ?candidates,
                    "Ingest with ambiguous device id suffix dropped"
                );
                return None;
            }
        };

        if device_id != raw_device_id {
            tracing::debug!(raw = %raw_device_id, device_id = %device_id, "Resolved device id suffix");
        }

        let position = *registry.index.get(&device_id)?;
        let slot = &mut registry.slots[position];
        slot.apply_detections(detections, now);

        tracing::debug!(
            device_id = %device_id,
            slot = position,
            people_count = slot.people_count,
            detections = slot.last_detections.len(),
            "Detections ingested"
        );

        Some(position)
    }

    /// Occupancy of one slot
    pub async fn occupancy(
        &self,
        position: usize,
        now: DateTime<Utc>,
        vacancy_threshold_minutes: u32,
    ) -> Option<Occupancy> {
        self.registry
            .read()
            .await
            .slots
            .get(position)
            .map(|slot| slot.occupancy(now, vacancy_threshold_minutes))
    }

    /// Copy of one slot
    pub async fn slot(&self, position: usize) -> Option<Slot> {
        self.registry.read().await.slots.get(position).cloned()
    }

    /// Compose the externally visible view of all slots
    pub async fn snapshot(&self, now: DateTime<Utc>, vacancy_threshold_minutes: u32) -> Snapshot {
        let registry = self.registry.read().await;
        let devices = registry
            .slots
            .iter()
            .enumerate()
            .map(|(position, slot)| slot.view(position, now, vacancy_threshold_minutes))
            .collect();

        Snapshot {
            timestamp: now,
            devices,
            app_state: SnapshotMetadata {
                client_id: String::new(),
                vacant_time_minutes: vacancy_threshold_minutes,
            },
        }
    }
}
