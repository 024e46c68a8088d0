//! Shared fixtures for the HTTP integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use audioguard_core::models::NewUploadRecord;
use audioguard_core::store::{MemoryResultStore, ResultStore};
use audioguard_core::{
    AccessToken, AppConfig, AudioFile, DetectionError, DetectionResult, DetectionService,
    JobStatus, Session, SessionStore,
};
use audioguard_server::app;
use audioguard_server::http::HttpState;
use axum::body::Body;
use axum::http::{header, Request};
use tokio_util::sync::CancellationToken;

pub const BOUNDARY: &str = "audioguard-test-boundary";

/// Detector double: every job finishes on the first poll with a fixed status.
pub struct ScriptedDetector {
    calls: AtomicU32,
    terminal: JobStatus,
}

impl ScriptedDetector {
    pub fn succeeding(is_ai: bool, confidence: u64) -> Self {
        Self {
            calls: AtomicU32::new(0),
            terminal: JobStatus::Succeeded(DetectionResult {
                is_ai,
                confidence: serde_json::Number::from(confidence),
            }),
        }
    }

    /// Job never finishes; only cancellation or the attempt ceiling ends polling.
    pub fn never_finishing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            terminal: JobStatus::Running("processing".to_string()),
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            terminal: JobStatus::Failed(Some(serde_json::json!({
                "job_infos": { "job_status": "error" }
            }))),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DetectionService for ScriptedDetector {
    async fn authenticate(&self) -> Result<AccessToken, DetectionError> {
        self.bump();
        Ok(AccessToken::new("test-token"))
    }

    async fn provision_storage(&self, _: &AccessToken) -> Result<String, DetectionError> {
        self.bump();
        Ok("storage-abc".to_string())
    }

    async fn upload_file(
        &self,
        _: &AccessToken,
        _: &str,
        _: &AudioFile,
    ) -> Result<(), DetectionError> {
        self.bump();
        Ok(())
    }

    async fn resolve_access_url(
        &self,
        _: &AccessToken,
        storage_id: &str,
    ) -> Result<String, DetectionError> {
        self.bump();
        Ok(format!("https://files.test/{}", storage_id))
    }

    async fn submit_job(&self, _: &AccessToken, _: &str) -> Result<String, DetectionError> {
        self.bump();
        Ok("job-xyz".to_string())
    }

    async fn job_status(&self, _: &AccessToken, _: &str) -> Result<JobStatus, DetectionError> {
        self.bump();
        Ok(self.terminal.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config(production: bool) -> AppConfig {
    let mut config = AppConfig::default();
    config.service.environment = if production { "production" } else { "development" }.to_string();
    config.detection.client_id = "client-id".to_string();
    config.detection.client_secret = "client-secret".to_string();
    config.detection.poll_interval_ms = 5;
    config.detection.max_poll_attempts = 3;
    config
}

pub struct TestApp {
    pub state: Arc<HttpState>,
    pub store: Arc<MemoryResultStore>,
}

pub fn make_app(config: AppConfig, detector: Arc<dyn DetectionService>) -> TestApp {
    let store = Arc::new(MemoryResultStore::new());
    let state = app::build_state(config, detector, store.clone(), CancellationToken::new());
    TestApp { state, store }
}

impl TestApp {
    /// Register a live session and pre-load `prior` uploads against it.
    pub async fn session_with_uploads(&self, prior: usize) -> Session {
        let session = Session::issue(chrono::Duration::hours(1)).unwrap();
        self.state.sessions.set(session.clone()).await.unwrap();
        for i in 0..prior {
            self.store
                .insert(NewUploadRecord {
                    session_id: session.id.clone(),
                    ip_address: None,
                    file_name: format!("prior-{}.mp3", i),
                    external_file_id: format!("storage-{}", i),
                    is_ai: false,
                    confidence: serde_json::Number::from(12),
                })
                .await
                .unwrap();
        }
        session
    }

    pub fn cookie_for(&self, session: &Session) -> String {
        format!("{}={}", self.state.config.session.cookie_name, session.id)
    }
}

pub fn multipart_body(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(cookie: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header("x-forwarded-for", "203.0.113.7");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

pub async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
