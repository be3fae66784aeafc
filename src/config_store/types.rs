//! ConfigStore data types

use crate::device_state::SlotConfig;
use serde::{Deserialize, Serialize};

/// Placeholder returned instead of the stored client secret
pub const MASKED_SECRET: &str = "********";

pub const DEFAULT_VACANT_TIME_MINUTES: u32 = 5;

/// Accepted vacancy threshold range (minutes)
pub const VACANT_TIME_RANGE: std::ops::RangeInclusive<u32> = 1..=30;

/// Persisted settings document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_vacant_time_minutes")]
    pub vacant_time_minutes: u32,
    #[serde(default)]
    pub devices: Vec<SlotConfig>,
}

fn default_vacant_time_minutes() -> u32 {
    DEFAULT_VACANT_TIME_MINUTES
}

impl Settings {
    pub fn with_slot_count(slot_count: usize) -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            vacant_time_minutes: DEFAULT_VACANT_TIME_MINUTES,
            devices: vec![SlotConfig::default(); slot_count],
        }
    }

    /// Pad or cut the device list to exactly `slot_count` entries
    pub(crate) fn normalize(&mut self, slot_count: usize) {
        self.devices.resize_with(slot_count, SlotConfig::default);
        if !VACANT_TIME_RANGE.contains(&self.vacant_time_minutes) {
            tracing::warn!(
                vacant_time_minutes = self.vacant_time_minutes,
                "Stored vacancy threshold out of range, using default"
            );
            self.vacant_time_minutes = DEFAULT_VACANT_TIME_MINUTES;
        }
    }

    /// Copy safe to return to the settings UI
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        if !masked.client_secret.is_empty() {
            masked.client_secret = MASKED_SECRET.to_string();
        }
        masked
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Update common settings request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCommonRequest {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub vacant_time_minutes: Option<u32>,
}

/// Update device settings request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDeviceRequest {
    pub device_id: Option<String>,
    pub display_name: Option<String>,
}
