//! DeviceState types

use crate::detection_decoder::DetectionSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix carried by every platform-issued device id
pub const CANONICAL_ID_PREFIX: &str = "Aid-";

/// Detector class code for a person
pub const PERSON_CLASS_ID: u32 = 0;

/// Default number of monitored slots
pub const DEFAULT_SLOT_COUNT: usize = 5;

/// Device application-processor state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamingMode {
    Idle,
    StreamingImage,
    StreamingInferenceResult,
    StreamingBoth,
    #[default]
    Unknown,
    /// Connectivity could not be fetched
    Error,
}

impl StreamingMode {
    /// Parse the platform's operation state string
    pub fn from_platform(value: &str) -> Self {
        match value {
            "Idle" => Self::Idle,
            "StreamingImage" => Self::StreamingImage,
            "StreamingInferenceResult" => Self::StreamingInferenceResult,
            "StreamingBoth" => Self::StreamingBoth,
            _ => Self::Unknown,
        }
    }

    /// Device is uploading inference results in this mode
    pub fn carries_inference(&self) -> bool {
        matches!(self, Self::StreamingInferenceResult | Self::StreamingBoth)
    }
}

/// Occupancy classification of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    /// People are in the latest detection set
    Occupied,
    /// Nobody now, but someone was seen within the vacancy threshold
    PossiblyOccupied,
    /// Never seen, or the threshold has elapsed
    Vacant,
}

/// Per-slot configuration (also the settings file's device entry)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub background_image: String,
}

/// One monitored position
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub device_id: Option<String>,
    pub display_name: String,
    pub background_image: String,
    pub connected: bool,
    pub inference_active: bool,
    pub streaming_mode: StreamingMode,
    pub people_count: usize,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_detections: DetectionSet,
}

impl Slot {
    pub fn from_config(config: &SlotConfig) -> Self {
        let device_id = config.device_id.trim();
        Self {
            device_id: (!device_id.is_empty()).then(|| device_id.to_string()),
            display_name: config.display_name.clone(),
            background_image: config.background_image.clone(),
            ..Default::default()
        }
    }

    /// Classify occupancy at `now`
    pub fn occupancy(&self, now: DateTime<Utc>, vacancy_threshold_minutes: u32) -> Occupancy {
        if self.people_count > 0 {
            return Occupancy::Occupied;
        }

        if let Some(last) = self.last_detection_time {
            let elapsed_minutes = (now - last).num_milliseconds() as f64 / 60_000.0;
            if elapsed_minutes < f64::from(vacancy_threshold_minutes) {
                return Occupancy::PossiblyOccupied;
            }
        }

        Occupancy::Vacant
    }

    /// Replace the detection set and recount people
    pub(crate) fn apply_detections(&mut self, detections: DetectionSet, now: DateTime<Utc>) {
        self.people_count = detections.count_class(PERSON_CLASS_ID);
        self.last_detections = detections;

        if self.people_count > 0 {
            self.last_detection_time = Some(match self.last_detection_time {
                Some(previous) if previous > now => previous,
                _ => now,
            });
        }
    }

    pub(crate) fn apply_connectivity(
        &mut self,
        connected: bool,
        mode: StreamingMode,
        now: DateTime<Utc>,
    ) {
        self.connected = connected;
        self.streaming_mode = mode;
        self.inference_active = connected && mode.carries_inference();
        self.last_update_time = Some(now);
    }

    /// Drop everything learned from the previously bound device
    pub(crate) fn reset_observations(&mut self) {
        self.connected = false;
        self.inference_active = false;
        self.streaming_mode = StreamingMode::Unknown;
        self.people_count = 0;
        self.last_detection_time = None;
        self.last_update_time = None;
        self.last_detections = DetectionSet::default();
    }

    pub fn view(&self, slot: usize, now: DateTime<Utc>, vacancy_threshold_minutes: u32) -> SlotView {
        SlotView {
            slot,
            device_id: self.device_id.clone().unwrap_or_default(),
            display_name: self.display_name.clone(),
            background_image: self.background_image.clone(),
            connected: self.connected,
            inference_active: self.inference_active,
            operation_state: self.streaming_mode,
            people_count: self.people_count,
            last_detection_time: self.last_detection_time,
            last_update_time: self.last_update_time,
            occupancy_state: self.occupancy(now, vacancy_threshold_minutes),
            detections: self.last_detections.clone(),
        }
    }
}

/// Externally visible view of a slot
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub slot: usize,
    pub device_id: String,
    pub display_name: String,
    pub background_image: String,
    pub connected: bool,
    pub inference_active: bool,
    pub operation_state: StreamingMode,
    pub people_count: usize,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub occupancy_state: Occupancy,
    pub detections: DetectionSet,
}

/// Global metadata sent with every snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotMetadata {
    pub client_id: String,
    pub vacant_time_minutes: u32,
}

/// Point-in-time view of all slots
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<SlotView>,
    pub app_state: SnapshotMetadata,
}

impl Snapshot {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.app_state.client_id = client_id.into();
        self
    }
}
