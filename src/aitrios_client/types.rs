//! Device platform API types and response extraction

use crate::device_state::StreamingMode;
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://console.aitrios.sony-semicon.com/api/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://auth.aitrios.sony-semicon.com/oauth2/default/v1/token";

/// Token lifetime assumed when the response omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Tokens are treated as expired this long before the server says so
pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    pub fn lifetime_secs(&self) -> u64 {
        self.expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)
    }
}

/// Latest captured device image
#[derive(Debug, Clone, Deserialize)]
pub struct LatestImageResponse {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub capture_time: Option<String>,
}

/// JSON pointers tried in order; the first string value wins
pub type ExtractionRules = &'static [&'static str];

pub const CONNECTION_STATE_RULES: ExtractionRules = &[
    "/connectionState",
    "/connection_state",
    "/status/connectionState",
];

pub const OPERATION_STATE_RULES: ExtractionRules = &[
    "/state/Status/ApplicationProcessor",
    "/state/status/ApplicationProcessor",
    "/status/ApplicationProcessor",
    "/operationState",
];

pub fn extract_first<'a>(value: &'a Value, rules: ExtractionRules) -> Option<&'a str> {
    rules
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(Value::as_str))
}

/// `(connected, streaming mode)` from a device info document
pub fn parse_connection_state(device_info: &Value) -> (bool, StreamingMode) {
    let connected = extract_first(device_info, CONNECTION_STATE_RULES) == Some("Connected");
    let mode = extract_first(device_info, OPERATION_STATE_RULES)
        .map(StreamingMode::from_platform)
        .unwrap_or_default();
    (connected, mode)
}

/// Device command bodies report success as `{"result": "SUCCESS"}`
pub fn command_result(body: Value, action: &str) -> Result<Value> {
    if body.get("result").and_then(Value::as_str) == Some("SUCCESS") {
        return Ok(body);
    }

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Err(Error::Api(format!("{} rejected: {}", action, message)))
}
