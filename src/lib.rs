//! People Monitor Library
//!
//! Multi-device occupancy monitor for edge vision cameras.
//!
//! ## Architecture
//!
//! 1. DetectionDecoder - Schema-less binary detection payload decoder
//! 2. DeviceStateEngine - Slot registry, device id resolution, occupancy
//! 3. RealtimeHub - WebSocket viewer fan-out
//! 4. BroadcastScheduler - Periodic connectivity refresh and snapshot push
//! 5. Ingress - Device metadata push handling
//! 6. ConfigStore - Settings file (credentials, threshold, slot bindings)
//! 7. AitriosClient - Device platform adapter (ConnectivityProvider)
//! 8. BackgroundStore - Slot background images
//! 9. WebAPI - HTTP/WebSocket endpoints
//!
//! Data flow: device -> Ingress -> DetectionDecoder -> DeviceStateEngine
//! <- BroadcastScheduler -> RealtimeHub -> viewers

pub mod aitrios_client;
pub mod background_store;
pub mod broadcast_scheduler;
pub mod config_store;
pub mod connectivity;
pub mod detection_decoder;
pub mod device_state;
pub mod error;
pub mod ingress;
pub mod models;
pub mod realtime_hub;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
