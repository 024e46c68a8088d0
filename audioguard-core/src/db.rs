use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS upload_records (
    id               UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    session_id       TEXT NOT NULL,
    ip_address       TEXT,
    file_name        TEXT NOT NULL,
    external_file_id TEXT NOT NULL,
    is_ai            BOOLEAN,
    confidence_score TEXT NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_upload_records_session_id ON upload_records (session_id);
"#;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// Idempotent; safe to run on every startup.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}
