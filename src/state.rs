//! Application state
//!
//! Holds all shared components, constructed once at startup

use crate::aitrios_client::{AitriosClient, AitriosConfig, DEFAULT_BASE_URL, DEFAULT_TOKEN_URL};
use crate::background_store::BackgroundStore;
use crate::broadcast_scheduler::ScheduleConfig;
use crate::config_store::ConfigStore;
use crate::device_state::{DeviceStateEngine, DEFAULT_SLOT_COUNT};
use crate::error::Result;
use crate::realtime_hub::RealtimeHub;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Settings JSON file
    pub settings_file: PathBuf,
    /// Viewer assets and uploaded background images
    pub static_dir: PathBuf,
    /// Number of monitored slots
    pub slot_count: usize,
    pub broadcast_interval_ms: u64,
    /// Pause after a failed broadcast cycle
    pub broadcast_backoff_ms: u64,
    pub connectivity_timeout_sec: u64,
    pub aitrios_base_url: String,
    pub aitrios_token_url: String,
    /// Viewer cap (None = unlimited)
    pub max_viewers: Option<usize>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8080),
            settings_file: std::env::var("SETTINGS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./config/settings.json")),
            static_dir: std::env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./static")),
            slot_count: env_or("SLOT_COUNT", DEFAULT_SLOT_COUNT),
            broadcast_interval_ms: env_or("BROADCAST_INTERVAL_MS", 500),
            broadcast_backoff_ms: env_or("BROADCAST_BACKOFF_MS", 1000),
            connectivity_timeout_sec: env_or("CONNECTIVITY_TIMEOUT_SEC", 5),
            aitrios_base_url: std::env::var("AITRIOS_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            aitrios_token_url: std::env::var("AITRIOS_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            max_viewers: std::env::var("MAX_VIEWERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|max| *max > 0),
        }
    }
}

impl AppConfig {
    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: Duration::from_millis(self.broadcast_interval_ms),
            backoff: Duration::from_millis(self.broadcast_backoff_ms),
            connectivity_timeout: Duration::from_secs(self.connectivity_timeout_sec),
        }
    }

    pub fn aitrios(&self) -> AitriosConfig {
        AitriosConfig {
            base_url: self.aitrios_base_url.clone(),
            token_url: self.aitrios_token_url.clone(),
            ..Default::default()
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// ConfigStore (settings file)
    pub config_store: Arc<ConfigStore>,
    /// DeviceStateEngine (slots, occupancy)
    pub engine: Arc<DeviceStateEngine>,
    /// RealtimeHub (WebSocket viewers)
    pub realtime: Arc<RealtimeHub>,
    /// AitriosClient (device platform)
    pub aitrios: Arc<AitriosClient>,
    /// BackgroundStore (slot images)
    pub backgrounds: Arc<BackgroundStore>,
    pub started_at: Instant,
}

impl AppState {
    /// Load settings and construct every component
    pub async fn build(config: AppConfig) -> Result<Self> {
        let config_store = Arc::new(ConfigStore::open(&config.settings_file, config.slot_count).await);
        let settings = config_store.settings().await;

        let engine = Arc::new(DeviceStateEngine::with_slots(
            config.slot_count,
            &settings.devices,
        ));
        let realtime = Arc::new(RealtimeHub::with_max_connections(config.max_viewers));
        let aitrios = Arc::new(AitriosClient::new(
            config.aitrios(),
            &settings.client_id,
            &settings.client_secret,
        )?);
        let backgrounds = Arc::new(BackgroundStore::new(&config.static_dir));

        Ok(Self {
            config,
            config_store,
            engine,
            realtime,
            aitrios,
            backgrounds,
            started_at: Instant::now(),
        })
    }
}
