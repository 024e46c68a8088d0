//! Result Store: append-only persistence for completed analyses.
//!
//! Two backends share the `ResultStore` trait:
//! - **Postgres** (`PgResultStore`): the `upload_records` table
//! - **Memory** (`MemoryResultStore`): process-local, used in tests and when no
//!   database URL is configured
//!
//! Neither backend exposes update or delete.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{NewUploadRecord, UploadRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist one completed analysis and return the stored row.
    async fn insert(&self, record: NewUploadRecord) -> Result<UploadRecord, StoreError>;

    /// Number of records stored for a session.
    async fn count_by_session(&self, session_id: &str) -> Result<u32, StoreError>;

    /// Backend liveness, returning a short description on success.
    async fn health(&self) -> Result<String, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// PgResultStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn insert(&self, record: NewUploadRecord) -> Result<UploadRecord, StoreError> {
        let confidence = record.confidence_text();
        let row: UploadRecord = sqlx::query_as(
            r#"
            INSERT INTO upload_records
                (session_id, ip_address, file_name, external_file_id, is_ai, confidence_score)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, session_id, ip_address, file_name, external_file_id,
                      is_ai, confidence_score, created_at
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.ip_address)
        .bind(&record.file_name)
        .bind(&record.external_file_id)
        .bind(record.is_ai)
        .bind(&confidence)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            id = %row.id,
            session_id = %row.session_id,
            external_file_id = %row.external_file_id,
            "Stored upload record"
        );

        Ok(row)
    }

    async fn count_by_session(&self, session_id: &str) -> Result<u32, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM upload_records WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// MemoryResultStore
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: Mutex<Vec<UploadRecord>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, oldest first.
    pub async fn records(&self) -> Vec<UploadRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert(&self, record: NewUploadRecord) -> Result<UploadRecord, StoreError> {
        let row = UploadRecord {
            id: Uuid::new_v4(),
            confidence_score: record.confidence_text(),
            session_id: record.session_id,
            ip_address: record.ip_address,
            file_name: record.file_name,
            external_file_id: record.external_file_id,
            is_ai: Some(record.is_ai),
            created_at: Utc::now(),
        };
        self.records.lock().await.push(row.clone());
        tracing::debug!(id = %row.id, session_id = %row.session_id, "Stored upload record in memory");
        Ok(row)
    }

    async fn count_by_session(&self, session_id: &str) -> Result<u32, StoreError> {
        let records = self.records.lock().await;
        let count = records.iter().filter(|r| r.session_id == session_id).count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok("in-memory".to_string())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
