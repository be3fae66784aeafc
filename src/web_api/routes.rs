//! API Routes

use crate::background_store::BackgroundStore;
use crate::config_store::{Settings, UpdateCommonRequest, UpdateDeviceRequest};
use crate::device_state::SlotConfig;
use crate::error::{Error, Result};
use crate::ingress;
use crate::models::{ApiResponse, BackgroundResponse, IngestResponse};
use crate::realtime_hub::{PongMessage, RealtimeHub};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, State,
    },
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Upload size limit for background images
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Wait after stopping inference before grabbing a still image
const INFERENCE_PAUSE: Duration = Duration::from_secs(2);

/// A socket write taking longer than this ends the viewer session
const VIEWER_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(super::health_check))
        .route("/api/health", get(super::health_check))
        // Device metadata push
        .route("/meta/:device_id", put(ingest_meta))
        .route("/meta/:device_id/*filename", put(ingest_meta_file))
        // Viewers
        .route("/ws", get(websocket_handler))
        // Settings
        .route("/api/settings", get(get_settings))
        .route("/api/settings/common", post(update_common_settings))
        .route("/api/settings/device/:index", post(update_device_settings))
        .route(
            "/api/settings/device/:index/background",
            post(upload_background_image),
        )
        .route(
            "/api/settings/device/:index/fetch_image",
            post(fetch_device_image),
        )
        // Device platform
        .route("/api/test_connection", post(test_connection))
        .route("/api/inference/:device_id/:action", post(control_inference))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

// ========================================
// Device metadata push
// ========================================

async fn ingest_meta(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Result<Json<IngestResponse>> {
    handle_push(&state, &device_id, &body).await
}

async fn ingest_meta_file(
    State(state): State<AppState>,
    Path((device_id, _filename)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<IngestResponse>> {
    handle_push(&state, &device_id, &body).await
}

async fn handle_push(state: &AppState, device_id: &str, body: &[u8]) -> Result<Json<IngestResponse>> {
    let started = Instant::now();

    let report = ingress::ingest_push(&state.engine, device_id, body, Utc::now()).await?;

    let process_time_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        device_id = %device_id,
        slot = ?report.slot,
        detections = report.detections,
        process_time_ms = process_time_ms,
        "Metadata push processed"
    );

    Ok(Json(IngestResponse {
        status: "success".to_string(),
        process_time_ms,
    }))
}

// ========================================
// WebSocket
// ========================================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut rx) = match state.realtime.register().await {
        Ok(registered) => registered,
        Err(e) => {
            tracing::warn!(error = %e, "Closing viewer over capacity");
            let _ = tokio::time::timeout(VIEWER_SEND_TIMEOUT, sender.send(Message::Close(None))).await;
            return;
        }
    };

    // Forward hub messages to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match tokio::time::timeout(VIEWER_SEND_TIMEOUT, sender.send(Message::Text(msg))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    tracing::warn!(connection_id = %conn_id, "Viewer write timed out");
                    break;
                }
            }
        }
    });

    let hub = state.realtime.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => handle_viewer_command(&hub, &conn_id, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.realtime.unregister(&conn_id).await;
}

/// Unrecognized or malformed messages are ignored
async fn handle_viewer_command(hub: &RealtimeHub, conn_id: &Uuid, text: &str) {
    let command: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!(connection_id = %conn_id, "Ignoring malformed viewer message");
            return;
        }
    };

    match command.get("type").and_then(|t| t.as_str()) {
        Some("ping") => {
            if let Ok(pong) = serde_json::to_string(&PongMessage::now()) {
                hub.send_to(conn_id, pong).await;
            }
        }
        other => {
            tracing::debug!(connection_id = %conn_id, command = ?other, "Ignoring viewer command");
        }
    }
}

// ========================================
// Settings
// ========================================

async fn get_settings(State(state): State<AppState>) -> Json<ApiResponse<Settings>> {
    Json(ApiResponse::success(state.config_store.masked().await))
}

async fn update_common_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateCommonRequest>,
) -> Result<Json<ApiResponse<Settings>>> {
    let settings = state.config_store.update_common(req).await?;

    if settings.has_credentials() {
        state
            .aitrios
            .update_credentials(&settings.client_id, &settings.client_secret)
            .await?;
    }

    tracing::info!(
        client_id = %settings.client_id,
        vacant_time_minutes = settings.vacant_time_minutes,
        "Common settings updated"
    );

    Ok(Json(
        ApiResponse::success(settings.masked()).with_message("Common settings updated"),
    ))
}

async fn update_device_settings(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(req): Json<UpdateDeviceRequest>,
) -> Result<Json<ApiResponse<SlotConfig>>> {
    let _slots = state.config_store.lock_slots().await;
    let device = state.config_store.update_device(index, req.clone()).await?;

    state
        .engine
        .rebind_slot(index, req.device_id.as_deref(), req.display_name.as_deref())
        .await?;

    Ok(Json(
        ApiResponse::success(device).with_message(format!("Device {} updated", index + 1)),
    ))
}

async fn upload_background_image(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<BackgroundResponse>>> {
    check_index(&state, index)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let ext = BackgroundStore::accepted_extension(&filename)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("Failed to read upload: {}", e)))?;

        let relative = store_background(&state, index, &ext, &data).await?;
        return Ok(Json(
            ApiResponse::success(BackgroundResponse { filename: relative })
                .with_message("Background image uploaded"),
        ));
    }

    Err(Error::Validation("Missing 'file' field".to_string()))
}

async fn fetch_device_image(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<ApiResponse<BackgroundResponse>>> {
    let device_id = state.config_store.device(index).await?.device_id;
    if device_id.trim().is_empty() {
        return Err(Error::Validation(format!(
            "Device {} has no device id",
            index + 1
        )));
    }

    let was_active = state.engine.is_inference_active(&device_id).await;
    if was_active {
        state.aitrios.stop_inference(&device_id).await?;
        state.engine.set_inference_active(&device_id, false).await;
        tokio::time::sleep(INFERENCE_PAUSE).await;
    }

    let image = state.aitrios.latest_image(&device_id).await;

    if was_active {
        match state.aitrios.start_inference(&device_id).await {
            Ok(_) => {
                state.engine.set_inference_active(&device_id, true).await;
            }
            Err(e) => {
                tracing::error!(device_id = %device_id, error = %e, "Failed to resume inference");
            }
        }
    }

    let relative = store_background(&state, index, ".jpg", &image?).await?;
    Ok(Json(
        ApiResponse::success(BackgroundResponse { filename: relative })
            .with_message("Device image fetched"),
    ))
}

async fn store_background(state: &AppState, index: usize, ext: &str, data: &[u8]) -> Result<String> {
    let relative = state.backgrounds.save(index, ext, data, Utc::now()).await?;
    let _slots = state.config_store.lock_slots().await;
    state.config_store.set_background(index, &relative).await?;
    state.engine.set_background(index, &relative).await?;
    Ok(relative)
}

fn check_index(state: &AppState, index: usize) -> Result<()> {
    if index >= state.engine.slot_count() {
        return Err(Error::Validation(format!("Invalid device index: {}", index)));
    }
    Ok(())
}

// ========================================
// Device platform
// ========================================

async fn test_connection(State(state): State<AppState>) -> Result<Json<ApiResponse<()>>> {
    state.aitrios.test_connection().await?;
    Ok(Json(ApiResponse::done("Connected to device platform")))
}

async fn control_inference(
    State(state): State<AppState>,
    Path((device_id, action)): Path<(String, String)>,
) -> Result<Json<ApiResponse<serde_json::Value>>> {
    let response = match action.as_str() {
        "start" => state.aitrios.start_inference(&device_id).await?,
        "stop" => state.aitrios.stop_inference(&device_id).await?,
        other => {
            return Err(Error::Validation(format!(
                "Invalid action '{}': expected 'start' or 'stop'",
                other
            )))
        }
    };

    let active = action == "start";
    state.engine.set_inference_active(&device_id, active).await;
    tracing::info!(device_id = %device_id, active = active, "Inference toggled");

    Ok(Json(ApiResponse::success(response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_viewer_commands() {
        let hub = RealtimeHub::new();
        let (id, mut rx) = hub.register().await.unwrap();

        handle_viewer_command(&hub, &id, "not json").await;
        handle_viewer_command(&hub, &id, r#"{"type":"x"}"#).await;
        handle_viewer_command(&hub, &id, r#"{"no_type":true}"#).await;
        assert!(rx.try_recv().is_err());

        handle_viewer_command(&hub, &id, r#"{"type":"ping"}"#).await;
        let pong: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(pong["type"], "pong");
        let timestamp = pong["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

        assert!(rx.try_recv().is_err());
        assert_eq!(hub.connection_count(), 1);
    }
}
