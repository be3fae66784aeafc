//! Connectivity facts for bound devices
//!
//! The broadcast scheduler polls one `ConnectivityProvider` per cycle. Every
//! poll is bounded by `fetch_bounded`, and a failure degrades to
//! `(false, StreamingMode::Error)` instead of failing the cycle.

use crate::device_state::StreamingMode;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Source of `(connected, streaming mode)` for a device
#[async_trait]
pub trait ConnectivityProvider: Send + Sync {
    async fn connection_state(&self, device_id: &str) -> Result<(bool, StreamingMode)>;
}

/// Fetch connectivity with an upper latency bound
pub async fn fetch_bounded(
    provider: &dyn ConnectivityProvider,
    device_id: &str,
    timeout: Duration,
) -> Result<(bool, StreamingMode)> {
    match tokio::time::timeout(timeout, provider.connection_state(device_id)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Network(format!(
            "Connectivity fetch for {} timed out after {}ms",
            device_id,
            timeout.as_millis()
        ))),
    }
}

/// Like `fetch_bounded`, mapping any failure to the disconnected error state
pub async fn fetch_or_error_state(
    provider: &dyn ConnectivityProvider,
    device_id: &str,
    timeout: Duration,
) -> (bool, StreamingMode) {
    match fetch_bounded(provider, device_id, timeout).await {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(device_id = %device_id, error = %e, "Connectivity fetch failed");
            (false, StreamingMode::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl ConnectivityProvider for Slow {
        async fn connection_state(&self, _device_id: &str) -> Result<(bool, StreamingMode)> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok((true, StreamingMode::StreamingBoth))
        }
    }

    struct Failing;

    #[async_trait]
    impl ConnectivityProvider for Failing {
        async fn connection_state(&self, _device_id: &str) -> Result<(bool, StreamingMode)> {
            Err(Error::Api("401".to_string()))
        }
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let result = fetch_bounded(&Slow, "dev", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_failure_maps_to_error_state() {
        let state = fetch_or_error_state(&Failing, "dev", Duration::from_secs(1)).await;
        assert_eq!(state, (false, StreamingMode::Error));
    }
}
