//! Periodic eviction of expired sessions.

use std::sync::Arc;
use std::time::Duration;

use audioguard_core::SessionStore;
use tokio_util::sync::CancellationToken;

/// Purge expired sessions every `interval` until `shutdown` is cancelled.
pub async fn run_session_sweeper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Session sweeper started (interval: {}s)", interval.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.purge_expired().await {
                    Ok(0) => tracing::debug!("Session sweep: nothing to purge"),
                    Ok(n) => tracing::info!("Session sweep purged {} expired sessions", n),
                    Err(e) => tracing::warn!("Session sweep error (non-fatal): {}", e),
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Session sweeper shutting down");
                break;
            }
        }
    }
}
