//! BroadcastScheduler - Periodic Snapshot Broadcast
//!
//! ## Responsibilities
//!
//! - Poll connectivity for every bound device once per cycle
//! - Compose the snapshot and push it to all viewers
//! - Back off after a failed cycle, stop on shutdown
//!
//! Suspension points are the bounded connectivity fetches, the viewer push
//! and the inter-cycle sleep. Shutdown is observed during the sleep.

use crate::config_store::ConfigStore;
use crate::connectivity::{fetch_or_error_state, ConnectivityProvider};
use crate::device_state::DeviceStateEngine;
use crate::error::Result;
use crate::realtime_hub::{PushReport, RealtimeHub};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Scheduler timing
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub backoff: Duration,
    pub connectivity_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            backoff: Duration::from_millis(1000),
            connectivity_timeout: Duration::from_secs(5),
        }
    }
}

/// BroadcastScheduler instance
pub struct BroadcastScheduler {
    engine: Arc<DeviceStateEngine>,
    hub: Arc<RealtimeHub>,
    config_store: Arc<ConfigStore>,
    provider: Arc<dyn ConnectivityProvider>,
    schedule: ScheduleConfig,
}

impl BroadcastScheduler {
    pub fn new(
        engine: Arc<DeviceStateEngine>,
        hub: Arc<RealtimeHub>,
        config_store: Arc<ConfigStore>,
        provider: Arc<dyn ConnectivityProvider>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            engine,
            hub,
            config_store,
            provider,
            schedule,
        }
    }

    /// One broadcast cycle
    pub async fn run_cycle(&self) -> Result<PushReport> {
        let device_ids = self.engine.bound_device_ids().await;

        let states = join_all(device_ids.iter().map(|device_id| {
            fetch_or_error_state(
                self.provider.as_ref(),
                device_id,
                self.schedule.connectivity_timeout,
            )
        }))
        .await;

        let now = Utc::now();
        for (device_id, (connected, mode)) in device_ids.iter().zip(states) {
            self.engine
                .update_connectivity(device_id, connected, mode, now)
                .await;
        }

        let settings = self.config_store.settings().await;
        let snapshot = self
            .engine
            .snapshot(now, settings.vacant_time_minutes)
            .await
            .with_client_id(settings.client_id);

        self.hub.push_snapshot(&snapshot).await
    }

    /// Spawn the broadcast loop
    ///
    /// The loop exits when the shutdown channel fires or closes.
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_ms = self.schedule.interval.as_millis() as u64,
                backoff_ms = self.schedule.backoff.as_millis() as u64,
                "Broadcast scheduler started"
            );

            loop {
                let pause = match self.run_cycle().await {
                    Ok(_) => self.schedule.interval,
                    Err(e) => {
                        tracing::error!(error = %e, "Broadcast cycle failed");
                        self.schedule.backoff
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }

            tracing::info!("Broadcast scheduler stopped");
        })
    }
}
