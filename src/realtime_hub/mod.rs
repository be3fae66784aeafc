//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - Viewer connection management (optional connection cap)
//! - Snapshot fan-out, one serialization per cycle
//! - Eviction of viewers whose channel has closed
//!
//! Each viewer owns a bounded queue drained by its WebSocket send task, so a
//! push never waits on a slow socket. A viewer whose queue is full counts as
//! a failed push and is evicted.

use crate::device_state::Snapshot;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Snapshots queued per viewer before it is considered stalled
pub const VIEWER_QUEUE_DEPTH: usize = 32;

/// Reply to a viewer `{"type": "ping"}`
#[derive(Debug, Clone, Serialize)]
pub struct PongMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub timestamp: String,
}

impl PongMessage {
    pub fn now() -> Self {
        Self {
            message_type: "pong",
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Result of one snapshot push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Viewer connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
    max_connections: Option<usize>,
}

impl RealtimeHub {
    /// Create new RealtimeHub without a connection cap
    pub fn new() -> Self {
        Self::with_max_connections(None)
    }

    pub fn with_max_connections(max_connections: Option<usize>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
            max_connections,
        }
    }

    /// Register a new viewer
    pub async fn register(&self) -> Result<(Uuid, mpsc::Receiver<String>)> {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE_DEPTH);

        {
            let mut connections = self.connections.write().await;
            if let Some(max) = self.max_connections {
                if connections.len() >= max {
                    tracing::warn!(max_connections = max, "Viewer rejected, hub full");
                    return Err(Error::OverCapacity(format!(
                        "Viewer limit of {} reached",
                        max
                    )));
                }
            }
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Viewer connected");

        Ok((id, rx))
    }

    /// Unregister a viewer
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Viewer disconnected");
        }
    }

    /// Push one snapshot to every viewer
    ///
    /// Viewers whose queue is closed or full are removed after the iteration;
    /// the remaining viewers still receive this snapshot.
    pub async fn push_snapshot(&self, snapshot: &Snapshot) -> Result<PushReport> {
        let json = serde_json::to_string(snapshot)?;
        Ok(self.push_raw(json).await)
    }

    async fn push_raw(&self, json: String) -> PushReport {
        let (attempted, failed): (usize, Vec<Uuid>) = {
            let connections = self.connections.read().await;
            let failed = connections
                .values()
                .filter(|conn| conn.tx.try_send(json.clone()).is_err())
                .map(|conn| conn.id)
                .collect();
            (connections.len(), failed)
        };

        if !failed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in &failed {
                if connections.remove(id).is_some() {
                    self.connection_count.fetch_sub(1, Ordering::Relaxed);
                    tracing::info!(connection_id = %id, "Dropped viewer after failed push");
                }
            }
        }

        let report = PushReport {
            delivered: attempted - failed.len(),
            dropped: failed.len(),
        };
        tracing::trace!(
            delivered = report.delivered,
            dropped = report.dropped,
            "Snapshot pushed"
        );
        report
    }

    /// Send a message to one viewer without waiting for queue space
    pub async fn send_to(&self, id: &Uuid, message: String) -> bool {
        let connections = self.connections.read().await;
        match connections.get(id) {
            Some(conn) => conn.tx.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_state::DeviceStateEngine;

    async fn snapshot() -> Snapshot {
        DeviceStateEngine::new(2).snapshot(chrono::Utc::now(), 5).await
    }

    #[tokio::test]
    async fn test_failing_viewer_does_not_block_others() {
        let hub = RealtimeHub::new();
        let (_a, mut rx_a) = hub.register().await.unwrap();
        let (b, rx_b) = hub.register().await.unwrap();
        let (_c, mut rx_c) = hub.register().await.unwrap();
        drop(rx_b);

        let report = hub.push_snapshot(&snapshot().await).await.unwrap();
        assert_eq!(report, PushReport { delivered: 2, dropped: 1 });
        assert_eq!(hub.connection_count(), 2);
        assert!(!hub.send_to(&b, "x".to_string()).await);

        for rx in [&mut rx_a, &mut rx_c] {
            let message = rx.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(&message).unwrap();
            assert_eq!(value["devices"].as_array().map(Vec::len), Some(2));
        }
    }

    #[tokio::test]
    async fn test_stalled_viewer_is_evicted() {
        let hub = RealtimeHub::new();
        let (stalled, _stalled_rx) = hub.register().await.unwrap();
        let (_live, mut live_rx) = hub.register().await.unwrap();
        let snapshot = snapshot().await;

        for _ in 0..VIEWER_QUEUE_DEPTH {
            let report = hub.push_snapshot(&snapshot).await.unwrap();
            assert_eq!(report, PushReport { delivered: 2, dropped: 0 });
            assert!(live_rx.try_recv().is_ok());
        }

        let report = hub.push_snapshot(&snapshot).await.unwrap();
        assert_eq!(report, PushReport { delivered: 1, dropped: 1 });
        assert_eq!(hub.connection_count(), 1);
        assert!(!hub.send_to(&stalled, "x".to_string()).await);

        for _ in 0..1000 {
            hub.push_snapshot(&snapshot).await.unwrap();
            assert!(live_rx.try_recv().is_ok());
        }
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_cap() {
        let hub = RealtimeHub::with_max_connections(Some(1));
        let (first, _rx) = hub.register().await.unwrap();
        assert!(matches!(hub.register().await, Err(Error::OverCapacity(_))));

        hub.unregister(&first).await;
        assert!(hub.register().await.is_ok());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = RealtimeHub::new();
        let (id, _rx) = hub.register().await.unwrap();
        hub.unregister(&id).await;
        hub.unregister(&id).await;
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_pong_shape() {
        let value = serde_json::to_value(PongMessage::now()).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].is_string());
    }
}
