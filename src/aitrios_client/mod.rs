//! AitriosClient - Device Platform Adapter
//!
//! ## Responsibilities
//!
//! - OAuth2 client-credentials token acquisition and caching
//! - Device connectivity lookup (ConnectivityProvider)
//! - Inference result collection start/stop
//! - Latest device image retrieval

mod types;

pub use types::*;

use crate::connectivity::ConnectivityProvider;
use crate::device_state::StreamingMode;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Client configuration
#[derive(Debug, Clone)]
pub struct AitriosConfig {
    pub base_url: String,
    pub token_url: String,
    pub timeout: Duration,
}

impl Default for AitriosConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct Credentials {
    client_id: String,
    client_secret: String,
    token: Option<(String, Instant)>,
}

/// Device platform client
pub struct AitriosClient {
    http: reqwest::Client,
    config: AitriosConfig,
    credentials: Mutex<Credentials>,
}

impl AitriosClient {
    pub fn new(config: AitriosConfig, client_id: &str, client_secret: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            config,
            credentials: Mutex::new(Credentials {
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                token: None,
            }),
        })
    }

    /// Replace credentials and drop the cached token
    pub async fn update_credentials(&self, client_id: &str, client_secret: &str) -> Result<()> {
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(Error::Validation(
                "client_id and client_secret are required".to_string(),
            ));
        }

        let mut credentials = self.credentials.lock().await;
        credentials.client_id = client_id.to_string();
        credentials.client_secret = client_secret.to_string();
        credentials.token = None;

        tracing::info!("Device platform credentials updated");
        Ok(())
    }

    /// Cached access token, fetching a new one when missing or expired
    ///
    /// The credentials lock is released for the token round-trip. The new
    /// token is cached only if the credentials did not change meanwhile.
    pub async fn access_token(&self) -> Result<String> {
        let (client_id, client_secret) = {
            let credentials = self.credentials.lock().await;

            if let Some((token, expires_at)) = &credentials.token {
                if Instant::now() < *expires_at {
                    return Ok(token.clone());
                }
            }

            if credentials.client_id.is_empty() || credentials.client_secret.is_empty() {
                return Err(Error::Config(
                    "Device platform credentials are not configured".to_string(),
                ));
            }
            (credentials.client_id.clone(), credentials.client_secret.clone())
        };

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&client_id, Some(&client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", "system")])
            .send()
            .await?;

        let token: TokenResponse = Self::parse_response(response, "token request").await?;
        let lifetime = Duration::from_secs(token.lifetime_secs());

        let mut credentials = self.credentials.lock().await;
        if credentials.client_id == client_id && credentials.client_secret == client_secret {
            credentials.token = Some((token.access_token.clone(), Instant::now() + lifetime));
        }

        tracing::debug!(lifetime_secs = lifetime.as_secs(), "Access token obtained");
        Ok(token.access_token)
    }

    /// Raw device info document
    pub async fn device_info(&self, device_id: &str) -> Result<serde_json::Value> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.device_url(device_id, ""))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_response(response, "device info").await
    }

    pub async fn start_inference(&self, device_id: &str) -> Result<serde_json::Value> {
        self.post_device(device_id, "/inferenceresults/collectstart").await
    }

    pub async fn stop_inference(&self, device_id: &str) -> Result<serde_json::Value> {
        self.post_device(device_id, "/inferenceresults/collectstop").await
    }

    /// Latest captured image, base64-decoded
    pub async fn latest_image(&self, device_id: &str) -> Result<Vec<u8>> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.device_url(device_id, "/images/latest"))
            .bearer_auth(token)
            .send()
            .await?;
        let body: LatestImageResponse = Self::parse_response(response, "latest image").await?;

        let encoded = body
            .image
            .ok_or_else(|| Error::Api("Response carries no image data".to_string()))?;
        let image = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Parse(format!("Invalid image data: {}", e)))?;
        if image.is_empty() {
            return Err(Error::Api("Image data is empty".to_string()));
        }

        tracing::info!(
            device_id = %device_id,
            bytes = image.len(),
            capture_time = ?body.capture_time,
            "Fetched latest device image"
        );
        Ok(image)
    }

    /// Check credentials by obtaining a fresh token
    pub async fn test_connection(&self) -> Result<()> {
        self.credentials.lock().await.token = None;
        self.access_token().await?;
        Ok(())
    }

    async fn post_device(&self, device_id: &str, path: &str) -> Result<serde_json::Value> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.device_url(device_id, path))
            .bearer_auth(token)
            .send()
            .await?;
        let body = command_result(Self::parse_response(response, path).await?, path)?;
        tracing::info!(device_id = %device_id, path = %path, "Device command accepted");
        Ok(body)
    }

    fn device_url(&self, device_id: &str, path: &str) -> String {
        format!(
            "{}/devices/{}{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(device_id),
            path
        )
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{} failed: {} - {}", what, status, body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ConnectivityProvider for AitriosClient {
    async fn connection_state(&self, device_id: &str) -> Result<(bool, StreamingMode)> {
        let info = self.device_info(device_id).await?;
        Ok(parse_connection_state(&info))
    }
}
