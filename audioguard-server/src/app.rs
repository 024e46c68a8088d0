//! Wiring of the long-lived services behind the HTTP API.

use std::sync::Arc;

use audioguard_core::store::{MemoryResultStore, PgResultStore, ResultStore};
use audioguard_core::{
    db, AppConfig, AudioGuardError, DetectionService, HttpDetectionClient, MemorySessionStore,
    UploadOrchestrator,
};
use tokio_util::sync::CancellationToken;

use crate::http::HttpState;

/// Open the result store named by `database.url`. An empty URL selects the
/// in-memory store, whose records do not survive a restart.
pub async fn build_result_store(config: &AppConfig) -> Result<Arc<dyn ResultStore>, AudioGuardError> {
    if config.database.url.is_empty() {
        tracing::warn!("database.url is empty: upload records are kept in memory only");
        return Ok(Arc::new(MemoryResultStore::new()));
    }

    let pool = db::create_pool(&config.database).await?;
    db::ensure_schema(&pool).await?;
    tracing::info!("Connected to PostgreSQL result store");
    Ok(Arc::new(PgResultStore::new(pool)))
}

/// Assemble handler state from already-built collaborators.
pub fn build_state(
    config: AppConfig,
    detector: Arc<dyn DetectionService>,
    store: Arc<dyn ResultStore>,
    shutdown: CancellationToken,
) -> Arc<HttpState> {
    let orchestrator = UploadOrchestrator::new(&config, detector, store);
    Arc::new(HttpState {
        config: Arc::new(config),
        orchestrator: Arc::new(orchestrator),
        sessions: Arc::new(MemorySessionStore::new()),
        shutdown,
    })
}

/// Production wiring: HTTP detection client plus the configured result store.
pub async fn build_http_state(
    config: AppConfig,
    shutdown: CancellationToken,
) -> Result<Arc<HttpState>, AudioGuardError> {
    let detector: Arc<dyn DetectionService> =
        Arc::new(HttpDetectionClient::new(config.detection.clone())?);
    let store = build_result_store(&config).await?;
    Ok(build_state(config, detector, store, shutdown))
}
