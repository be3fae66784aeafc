//! DetectionDecoder - Binary Object-Detection Payload Decoder
//!
//! ## Responsibilities
//!
//! - Walk the device's flatbuffer-encoded inference result without a schema compiler
//! - Extract 2-D bounding-box detections in buffer order
//! - Skip individual malformed detections without failing the whole payload
//!
//! ## Layout
//!
//! ```text
//! root table
//!   [4] Perception table
//!         [4] ObjectDetectionList: [detection table]
//!               [4] ClassId u32   [6] BoundingBoxType u8
//!               [8] BoundingBox   [10] Score f32
//!                     [4] Left  [6] Top  [8] Right  [10] Bottom  (i32)
//! ```

mod cursor;
mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use cursor::{ByteCursor, DecodeError, DecodeResult, Table, TableVector};
pub use types::{Detection, DetectionSet, UNKNOWN_CLASS_ID};

/// Vtable slot ids
mod slot {
    pub const PERCEPTION: u16 = 4;
    pub const OBJECT_DETECTION_LIST: u16 = 4;

    pub const CLASS_ID: u16 = 4;
    pub const BOUNDING_BOX_TYPE: u16 = 6;
    pub const BOUNDING_BOX: u16 = 8;
    pub const SCORE: u16 = 10;

    pub const LEFT: u16 = 4;
    pub const TOP: u16 = 6;
    pub const RIGHT: u16 = 8;
    pub const BOTTOM: u16 = 10;
}

/// BoundingBoxType tag for the 2-D box variant
pub const BOUNDING_BOX_2D: u8 = 1;

/// Decode a payload, never failing
///
/// Top-level corruption yields an empty set and a log entry.
pub fn decode(buf: &[u8]) -> DetectionSet {
    match try_decode(buf) {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(error = %e, len = buf.len(), "Detection payload rejected");
            DetectionSet::default()
        }
    }
}

/// Decode a payload, reporting top-level corruption
///
/// Absent Perception / ObjectDetectionList fields are not errors and decode
/// to an empty set. Faults inside a single detection only drop that index.
pub fn try_decode(buf: &[u8]) -> DecodeResult<DetectionSet> {
    if buf.len() < 4 {
        return Err(DecodeError::TooShort { len: buf.len() });
    }

    let cursor = ByteCursor::new(buf);
    let root_pos = cursor.read_u32(0)? as usize;
    if root_pos == 0 {
        return Err(DecodeError::ZeroRootOffset);
    }
    let root = Table::at(cursor, root_pos);

    let Some(perception) = root.table(slot::PERCEPTION)? else {
        tracing::debug!("No perception data in payload");
        return Ok(DetectionSet::default());
    };

    let Some(list) = perception.table_vector(slot::OBJECT_DETECTION_LIST)? else {
        tracing::debug!("No detection list in payload");
        return Ok(DetectionSet::default());
    };

    // Offsets past the end of the buffer can never resolve; skip them in bulk
    // instead of failing once per declared element.
    let readable = list.addressable_len();
    if readable < list.len() {
        tracing::warn!(
            declared = list.len(),
            readable = readable,
            "Detection list truncated"
        );
    }

    let mut detections = Vec::with_capacity(readable);
    for index in 0..readable {
        match decode_detection(&list, index) {
            Ok(Some(detection)) => detections.push(detection),
            Ok(None) => {
                tracing::trace!(index = index, "Skipping non 2-D detection");
            }
            Err(e) => {
                tracing::warn!(index = index, error = %e, "Skipping malformed detection");
            }
        }
    }

    tracing::debug!(count = detections.len(), "Payload decoded");
    Ok(DetectionSet::new(detections))
}

fn decode_detection(list: &TableVector<'_>, index: usize) -> DecodeResult<Option<Detection>> {
    let table = list.table_at(index)?;

    let class_id = table.u32_or(slot::CLASS_ID, 0)?;
    let score = table.f32_or(slot::SCORE, 0.0)?;
    let bbox_type = table.u8_or(slot::BOUNDING_BOX_TYPE, 0)?;

    if bbox_type != BOUNDING_BOX_2D {
        return Ok(None);
    }
    let Some(bbox) = table.table(slot::BOUNDING_BOX)? else {
        return Ok(None);
    };

    Ok(Some(Detection {
        class_id,
        score,
        left: bbox.i32_or(slot::LEFT, 0)?,
        top: bbox.i32_or(slot::TOP, 0)?,
        right: bbox.i32_or(slot::RIGHT, 0)?,
        bottom: bbox.i32_or(slot::BOTTOM, 0)?,
    }))
}
