use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed analysis. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UploadRecord {
    pub id: Uuid,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub file_name: String,
    pub external_file_id: String,
    pub is_ai: Option<bool>,
    pub confidence_score: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewUploadRecord {
    pub session_id: String,
    pub ip_address: Option<String>,
    pub file_name: String,
    pub external_file_id: String,
    pub is_ai: bool,
    pub confidence: serde_json::Number,
}

impl NewUploadRecord {
    /// Confidence is stored as text to keep the upstream value verbatim.
    pub fn confidence_text(&self) -> String {
        self.confidence.to_string()
    }
}
