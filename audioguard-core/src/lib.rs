pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod quota;
pub mod session;
pub mod store;

pub use config::AppConfig;
pub use detection::{
    AccessToken, AudioFile, DetectionError, DetectionResult, DetectionService,
    HttpDetectionClient, JobStatus,
};
pub use error::{AudioGuardError, UploadError, ValidationError};
pub use orchestrator::{UploadOrchestrator, UploadOutcome, UploadRequest};
pub use quota::{QuotaExceeded, QuotaPolicy, QuotaTracker};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use store::{MemoryResultStore, PgResultStore, ResultStore, StoreError};
