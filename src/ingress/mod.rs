//! Ingress - Device Metadata Push Handling
//!
//! ## Responsibilities
//!
//! - Parse the pushed JSON body
//! - Take pre-decoded detections when present, otherwise decode the first
//!   usable base64 binary payload
//! - Hand the result to the DeviceStateEngine
//!
//! Only an unparsable body is reported back to the device. Everything past
//! that point degrades to "nothing ingested".

use crate::detection_decoder::{try_decode, Detection, DetectionSet, UNKNOWN_CLASS_ID};
use crate::device_state::DeviceStateEngine;
use crate::error::{Error, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pushed metadata document
#[derive(Debug, Default, Deserialize)]
pub struct MetaPush {
    #[serde(rename = "DeserializedData", default)]
    pub deserialized_data: Option<Value>,
    #[serde(rename = "Inferences", default)]
    pub inferences: Vec<Inference>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Inference {
    /// Base64 encoded binary detection payload
    #[serde(rename = "O", default)]
    pub output: Option<String>,
}

/// Where the ingested detections came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    PreDecoded,
    Binary { index: usize },
}

/// Outcome of one push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source: Option<PayloadSource>,
    pub detections: usize,
    pub slot: Option<usize>,
}

impl MetaPush {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::Parse(format!("Invalid JSON: {}", e)))
    }

    /// Detections carried by this push, if any payload is usable
    pub fn detections(&self) -> Option<(PayloadSource, DetectionSet)> {
        if let Some(Value::Object(entries)) = &self.deserialized_data {
            if !entries.is_empty() {
                return Some((PayloadSource::PreDecoded, pre_decoded(entries)));
            }
        }

        self.inferences.iter().enumerate().find_map(|(index, inference)| {
            let encoded = inference.output.as_deref().filter(|o| !o.is_empty())?;
            decode_payload(index, encoded).map(|set| (PayloadSource::Binary { index }, set))
        })
    }
}

/// Entries keyed by decimal index, ordered numerically
///
/// An entry without a class id is kept but never counts as a person.
fn pre_decoded(entries: &serde_json::Map<String, Value>) -> DetectionSet {
    let mut indexed: Vec<(u64, Detection)> = entries
        .iter()
        .filter_map(|(key, value)| {
            let Ok(index) = key.parse::<u64>() else {
                tracing::debug!(key = %key, "Ignoring non-index detection key");
                return None;
            };
            match serde_json::from_value::<Detection>(value.clone()) {
                Ok(mut detection) => {
                    if value.get("C").is_none() {
                        detection.class_id = UNKNOWN_CLASS_ID;
                    }
                    Some((index, detection))
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed pre-decoded detection");
                    None
                }
            }
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    DetectionSet::new(indexed.into_iter().map(|(_, detection)| detection).collect())
}

fn decode_payload(index: usize, encoded: &str) -> Option<DetectionSet> {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(inference = index, error = %e, "Inference payload is not base64");
            return None;
        }
    };

    match try_decode(&bytes) {
        Ok(set) => Some(set),
        Err(e) => {
            tracing::warn!(inference = index, error = %e, len = bytes.len(), "Inference payload rejected");
            None
        }
    }
}

/// Parse a push body and ingest its detections for `device_id`
pub async fn ingest_push(
    engine: &DeviceStateEngine,
    device_id: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<IngestReport> {
    let push = MetaPush::parse(body)?;

    let Some((source, detections)) = push.detections() else {
        tracing::debug!(device_id = %device_id, "Push carried no usable detections");
        return Ok(IngestReport {
            source: None,
            detections: 0,
            slot: None,
        });
    };

    let count = detections.len();
    let slot = engine.ingest(device_id, detections, now).await;

    Ok(IngestReport {
        source: Some(source),
        detections: count,
        slot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection_decoder::tests::{encode, TestDetection};
    use crate::device_state::SlotConfig;
    use serde_json::json;

    const DEVICE_A: &str = "Aid-80070001-0000-2000-9002-000000000a53";

    fn engine() -> DeviceStateEngine {
        DeviceStateEngine::with_slots(
            5,
            &[SlotConfig {
                device_id: DEVICE_A.to_string(),
                ..Default::default()
            }],
        )
    }

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[tokio::test]
    async fn test_binary_payload_ingested_via_suffix() {
        let engine = engine();
        let payload = encode(&[
            TestDetection::boxed(0, 0.9, [1, 2, 3, 4]),
            TestDetection::boxed(0, 0.8, [5, 6, 7, 8]),
            TestDetection::boxed(2, 0.7, [9, 9, 9, 9]),
        ]);
        let body = json!({"Inferences": [{"T": "20250101", "O": b64(&payload)}]});

        let report = ingest_push(&engine, "000000000a53", body.to_string().as_bytes(), Utc::now())
            .await
            .unwrap();

        assert_eq!(report.source, Some(PayloadSource::Binary { index: 0 }));
        assert_eq!(report.detections, 3);
        assert_eq!(report.slot, Some(0));
        assert_eq!(engine.slot(0).await.unwrap().people_count, 2);
    }

    #[tokio::test]
    async fn test_first_usable_payload_wins() {
        let engine = engine();
        let good = encode(&[TestDetection::boxed(0, 0.9, [1, 2, 3, 4])]);
        let body = json!({"Inferences": [
            {"O": ""},
            {"O": "***not base64***"},
            {"O": b64(&[0, 0, 0, 0, 0, 0, 0, 0])},
            {"O": b64(&good)},
            {"O": b64(&encode(&[]))},
        ]});

        let report = ingest_push(&engine, DEVICE_A, body.to_string().as_bytes(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.source, Some(PayloadSource::Binary { index: 3 }));
        assert_eq!(engine.slot(0).await.unwrap().people_count, 1);
    }

    #[tokio::test]
    async fn test_pre_decoded_data_ordered_by_index() {
        let engine = engine();
        let body = json!({
            "DeserializedData": {
                "10": {"C": 0, "P": 0.5, "X": 10, "Y": 0, "x": 1, "y": 1},
                "2": {"C": 3, "P": 0.5, "X": 2, "Y": 0, "x": 1, "y": 1},
                "note": "ignored",
                "0": {"C": 0, "P": 0.9, "X": 0, "Y": 0, "x": 1, "y": 1}
            },
            "Inferences": [{"O": b64(&encode(&[]))}]
        });

        let report = ingest_push(&engine, DEVICE_A, body.to_string().as_bytes(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.source, Some(PayloadSource::PreDecoded));

        let slot = engine.slot(0).await.unwrap();
        let lefts: Vec<i32> = slot.last_detections.iter().map(|d| d.left).collect();
        assert_eq!(lefts, vec![0, 2, 10]);
        assert_eq!(slot.people_count, 2);
    }

    #[tokio::test]
    async fn test_pre_decoded_entry_without_class_is_not_counted() {
        let engine = engine();
        let body = json!({
            "DeserializedData": {
                "0": {"P": 0.9, "X": 1, "Y": 2, "x": 3, "y": 4},
                "1": {"C": 0, "P": 0.8}
            }
        });

        ingest_push(&engine, DEVICE_A, body.to_string().as_bytes(), Utc::now())
            .await
            .unwrap();

        let slot = engine.slot(0).await.unwrap();
        assert_eq!(slot.last_detections.len(), 2);
        assert_eq!(slot.last_detections.get(0).map(|d| d.class_id), Some(UNKNOWN_CLASS_ID));
        assert_eq!(slot.last_detections.get(0).map(|d| d.left), Some(1));
        assert_eq!(slot.people_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let result = ingest_push(&engine(), DEVICE_A, b"{\"Inferences\": [", Utc::now()).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_unknown_device_and_empty_push_do_not_fail() {
        let engine = engine();
        let payload = b64(&encode(&[TestDetection::boxed(0, 0.9, [1, 2, 3, 4])]));
        let body = json!({"Inferences": [{"O": payload}]});

        let report = ingest_push(&engine, "ffffff", body.to_string().as_bytes(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.slot, None);

        let report = ingest_push(&engine, DEVICE_A, b"{}", Utc::now()).await.unwrap();
        assert_eq!(report.source, None);
        assert_eq!(engine.slot(0).await.unwrap().people_count, 0);
    }
}
