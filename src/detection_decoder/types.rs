//! Detection record types

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Class id given to pre-decoded entries that carry no `C` key
pub const UNKNOWN_CLASS_ID: u32 = u32::MAX;

/// One object detection with a 2-D bounding box
///
/// Field names follow the compact keys used on the wire by devices and
/// viewers (`C`, `P`, `X`, `Y`, `x`, `y`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "C", default)]
    pub class_id: u32,
    #[serde(rename = "P", default)]
    pub score: f32,
    #[serde(rename = "X", default)]
    pub left: i32,
    #[serde(rename = "Y", default)]
    pub top: i32,
    #[serde(rename = "x", default)]
    pub right: i32,
    #[serde(rename = "y", default)]
    pub bottom: i32,
}

/// Detections in discovery order
///
/// Serialized as an object keyed by the decimal index (`{"0": {..}}`) since
/// consumers address detections by position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionSet(Vec<Detection>);

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self(detections)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Detection> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.0.iter()
    }

    /// Number of detections carrying `class_id`
    pub fn count_class(&self, class_id: u32) -> usize {
        self.0.iter().filter(|d| d.class_id == class_id).count()
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self(detections)
    }
}

impl Serialize for DetectionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, detection) in self.0.iter().enumerate() {
            map.serialize_entry(&index.to_string(), detection)?;
        }
        map.end()
    }
}
