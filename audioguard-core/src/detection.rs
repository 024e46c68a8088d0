//! Detection client for AudioGuard: external identity, storage and AI-detection APIs
//!
//! Provides a `DetectionService` trait with one method per external step:
//! - **authenticate**: OAuth2 client-credentials token
//! - **provision_storage / upload_file / resolve_access_url**: object storage staging
//! - **submit_job / job_status**: asynchronous detection job
//!
//! `HttpDetectionClient` is the reqwest implementation. None of the calls retry.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::DetectionConfig;

// ============================================================================
// DetectionService trait
// ============================================================================

/// Abstraction over the external detection pipeline.
#[async_trait]
pub trait DetectionService: Send + Sync {
    /// Request a bearer token using the configured client credentials.
    async fn authenticate(&self) -> Result<AccessToken, DetectionError>;

    /// Create a storage location and return its opaque identifier.
    async fn provision_storage(&self, token: &AccessToken) -> Result<String, DetectionError>;

    /// Upload raw file bytes into a provisioned location.
    async fn upload_file(
        &self,
        token: &AccessToken,
        storage_id: &str,
        file: &AudioFile,
    ) -> Result<(), DetectionError>;

    /// Resolve the accessible URL of an uploaded object.
    async fn resolve_access_url(
        &self,
        token: &AccessToken,
        storage_id: &str,
    ) -> Result<String, DetectionError>;

    /// Start a detection job for the given URL and return the job id.
    async fn submit_job(&self, token: &AccessToken, access_url: &str)
        -> Result<String, DetectionError>;

    /// Fetch the current state of a detection job.
    async fn job_status(&self, token: &AccessToken, job_id: &str)
        -> Result<JobStatus, DetectionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Domain types
// ============================================================================

/// Bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A submitted audio file, as received from the client.
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl AudioFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// First entry of a finished job's result list. `confidence` keeps the
/// upstream JSON number as sent (`87` stays `87`, `12.5` stays `12.5`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "isAi")]
    pub is_ai: bool,
    pub confidence: serde_json::Number,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Any status other than `success`/`error`; carries the raw value.
    Running(String),
    Succeeded(DetectionResult),
    Failed(Option<serde_json::Value>),
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Storage transfer failed during {stage}: {message}")]
    Transfer {
        stage: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Detection API error during {stage} ({status})")]
    Upstream {
        stage: &'static str,
        status: u16,
        details: Option<serde_json::Value>,
    },

    #[error("Detection job {job_id} reported an error")]
    Processing {
        job_id: String,
        details: Option<serde_json::Value>,
    },

    #[error("Unexpected response during {stage}: {message}")]
    UnexpectedPayload { stage: &'static str, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Missing client credentials")]
    MissingCredentials,

    #[error("Detection job {job_id} still running after {attempts} status checks")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("Detection cancelled before the job finished")]
    Cancelled,
}

impl DetectionError {
    /// Upstream payload to surface to the caller, if one was captured.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            DetectionError::Authentication { details, .. }
            | DetectionError::Transfer { details, .. }
            | DetectionError::Upstream { details, .. }
            | DetectionError::Processing { details, .. } => details.clone(),
            _ => None,
        }
    }
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct StorageCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StorageView {
    #[serde(alias = "storage_url")]
    ircamamplify_storage_url: String,
}

#[derive(Debug, Serialize)]
struct SubmitJobRequest<'a> {
    #[serde(rename = "audioUrlList")]
    audio_url_list: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SubmitJobResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    job_infos: JobInfos,
}

#[derive(Debug, Deserialize)]
struct JobInfos {
    job_status: String,
    #[serde(default)]
    report_info: Option<ReportInfo>,
}

#[derive(Debug, Deserialize)]
struct ReportInfo {
    report: Report,
}

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(rename = "resultList", default)]
    result_list: Vec<DetectionResult>,
}

// ============================================================================
// HttpDetectionClient
// ============================================================================

/// Detection client backed by the external HTTP APIs.
#[derive(Debug, Clone)]
pub struct HttpDetectionClient {
    client: Client,
    config: DetectionConfig,
}

impl HttpDetectionClient {
    pub fn new(config: DetectionConfig) -> Result<Self, DetectionError> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(DetectionError::MissingCredentials);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Point all three APIs at one base URL (for testing / integration)
    pub fn with_base_url(
        mut config: DetectionConfig,
        base_url: String,
    ) -> Result<Self, DetectionError> {
        config.identity_url = base_url.clone();
        config.storage_url = base_url.clone();
        config.api_url = base_url;
        Self::new(config)
    }

    fn endpoint(base: &str, segments: &[&str]) -> Result<Url, DetectionError> {
        let mut url = Url::parse(base).map_err(|e| DetectionError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| DetectionError::InvalidUrl(format!("{} cannot be a base", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Drain a failed response into `(status, details)`.
async fn failure_details(response: Response) -> (u16, Option<serde_json::Value>) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        return (status, None);
    }
    let details = serde_json::from_str::<serde_json::Value>(&body)
        .unwrap_or(serde_json::Value::String(body));
    (status, Some(details))
}

fn transfer_error(stage: &'static str, e: impl fmt::Display) -> DetectionError {
    DetectionError::Transfer {
        stage,
        message: e.to_string(),
        details: None,
    }
}

#[async_trait]
impl DetectionService for HttpDetectionClient {
    async fn authenticate(&self) -> Result<AccessToken, DetectionError> {
        let url = Self::endpoint(&self.config.identity_url, &["oauth", "token"])?;
        let request = TokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            grant_type: "client_credentials",
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DetectionError::Authentication {
                message: e.to_string(),
                details: None,
            })?;

        if !response.status().is_success() {
            let (status, details) = failure_details(response).await;
            tracing::error!(status, details = ?details, "Token request rejected");
            return Err(DetectionError::Authentication {
                message: format!("token endpoint returned {}", status),
                details,
            });
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| DetectionError::Authentication {
                    message: format!("malformed token response: {}", e),
                    details: None,
                })?;

        Ok(AccessToken::new(body.access_token))
    }

    async fn provision_storage(&self, token: &AccessToken) -> Result<String, DetectionError> {
        const STAGE: &str = "provision";
        let url = Self::endpoint(&self.config.storage_url, &["manager", ""])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| transfer_error(STAGE, e))?;

        if !response.status().is_success() {
            let (status, details) = failure_details(response).await;
            return Err(DetectionError::Transfer {
                stage: STAGE,
                message: format!("storage manager returned {}", status),
                details,
            });
        }

        let created: StorageCreated = response.json().await.map_err(|e| transfer_error(STAGE, e))?;
        tracing::debug!(storage_id = %created.id, "Provisioned storage location");
        Ok(created.id)
    }

    async fn upload_file(
        &self,
        token: &AccessToken,
        storage_id: &str,
        file: &AudioFile,
    ) -> Result<(), DetectionError> {
        const STAGE: &str = "upload";
        let url = Self::endpoint(&self.config.storage_url, &[storage_id, &file.file_name])?;

        let response = self
            .client
            .put(url)
            .bearer_auth(token.secret())
            .header(reqwest::header::CONTENT_TYPE, &file.content_type)
            .body(file.data.clone())
            .send()
            .await
            .map_err(|e| transfer_error(STAGE, e))?;

        if !response.status().is_success() {
            let (status, details) = failure_details(response).await;
            return Err(DetectionError::Transfer {
                stage: STAGE,
                message: format!("storage upload returned {}", status),
                details,
            });
        }

        tracing::debug!(storage_id, bytes = file.size(), "Uploaded file to storage");
        Ok(())
    }

    async fn resolve_access_url(
        &self,
        token: &AccessToken,
        storage_id: &str,
    ) -> Result<String, DetectionError> {
        const STAGE: &str = "resolve";
        let url = Self::endpoint(&self.config.storage_url, &["manager", storage_id])?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| transfer_error(STAGE, e))?;

        if !response.status().is_success() {
            let (status, details) = failure_details(response).await;
            return Err(DetectionError::Transfer {
                stage: STAGE,
                message: format!("storage manager returned {}", status),
                details,
            });
        }

        let view: StorageView = response.json().await.map_err(|e| transfer_error(STAGE, e))?;
        Ok(view.ircamamplify_storage_url)
    }

    async fn submit_job(
        &self,
        token: &AccessToken,
        access_url: &str,
    ) -> Result<String, DetectionError> {
        const STAGE: &str = "submit";
        let url = Self::endpoint(&self.config.api_url, &["aidetector", ""])?;
        let request = SubmitJobRequest {
            audio_url_list: vec![access_url],
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(token.secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, details) = failure_details(response).await;
            return Err(DetectionError::Upstream {
                stage: STAGE,
                status,
                details,
            });
        }

        let body: SubmitJobResponse =
            response
                .json()
                .await
                .map_err(|e| DetectionError::UnexpectedPayload {
                    stage: STAGE,
                    message: e.to_string(),
                })?;

        tracing::info!(job_id = %body.id, "Detection job submitted");
        Ok(body.id)
    }

    async fn job_status(
        &self,
        token: &AccessToken,
        job_id: &str,
    ) -> Result<JobStatus, DetectionError> {
        const STAGE: &str = "status";
        let url = Self::endpoint(&self.config.api_url, &["aidetector", job_id])?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, details) = failure_details(response).await;
            return Err(DetectionError::Upstream {
                stage: STAGE,
                status,
                details,
            });
        }

        let raw: serde_json::Value = response.json().await?;
        parse_job_status(raw)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Interpret a job-status body. Only `success` and `error` are terminal.
pub fn parse_job_status(raw: serde_json::Value) -> Result<JobStatus, DetectionError> {
    const STAGE: &str = "status";
    let body: JobStatusResponse =
        serde_json::from_value(raw.clone()).map_err(|e| DetectionError::UnexpectedPayload {
            stage: STAGE,
            message: e.to_string(),
        })?;

    match body.job_infos.job_status.as_str() {
        "success" => body
            .job_infos
            .report_info
            .and_then(|info| info.report.result_list.into_iter().next())
            .map(JobStatus::Succeeded)
            .ok_or_else(|| DetectionError::UnexpectedPayload {
                stage: STAGE,
                message: "job succeeded with an empty result list".to_string(),
            }),
        "error" => Ok(JobStatus::Failed(Some(raw))),
        other => Ok(JobStatus::Running(other.to_string())),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> DetectionConfig {
        DetectionConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            poll_interval_ms: 10,
            max_poll_attempts: 3,
            request_timeout_secs: 5,
            ..DetectionConfig::default()
        }
    }

    fn test_client(mock_server: &MockServer) -> HttpDetectionClient {
        HttpDetectionClient::with_base_url(test_config(), mock_server.uri())
            .expect("Failed to create client")
    }

    fn wav_file() -> AudioFile {
        AudioFile {
            file_name: "my song.wav".to_string(),
            content_type: "audio/wav".to_string(),
            data: Bytes::from_static(b"RIFF....WAVEfmt "),
        }
    }

    #[tokio::test]
    async fn test_authenticate_posts_client_credentials() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_json(serde_json::json!({
                "client_id": "client-id",
                "client_secret": "client-secret",
                "grant_type": "client_credentials"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "tok-123" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let token = test_client(&mock_server).authenticate().await.unwrap();
        assert_eq!(token.secret(), "tok-123");
        assert_eq!(format!("{:?}", token), "AccessToken(***)");
    }

    #[tokio::test]
    async fn test_authenticate_failure_carries_upstream_details() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "error": "invalid_client" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = test_client(&mock_server).authenticate().await;
        match result {
            Err(err @ DetectionError::Authentication { .. }) => {
                let details = err.details().expect("details should be captured");
                assert_eq!(details["error"], "invalid_client");
            }
            other => panic!("Expected Authentication error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let config = DetectionConfig::default();
        match HttpDetectionClient::new(config) {
            Err(DetectionError::MissingCredentials) => {}
            other => panic!("Expected MissingCredentials, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_storage_steps_use_bearer_and_content_type() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/manager/"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "st-1" })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/st-1/my%20song.wav"))
            .and(header("authorization", "Bearer tok"))
            .and(header("content-type", "audio/wav"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/manager/st-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "st-1",
                "ircamamplify_storage_url": "https://files.example/st-1/my%20song.wav"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server);
        let token = AccessToken::new("tok");

        let storage_id = client.provision_storage(&token).await.unwrap();
        assert_eq!(storage_id, "st-1");
        client.upload_file(&token, &storage_id, &wav_file()).await.unwrap();
        let url = client.resolve_access_url(&token, &storage_id).await.unwrap();
        assert_eq!(url, "https://files.example/st-1/my%20song.wav");
    }

    #[tokio::test]
    async fn test_upload_failure_is_transfer_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .mount(&mock_server)
            .await;

        let result = test_client(&mock_server)
            .upload_file(&AccessToken::new("tok"), "st-1", &wav_file())
            .await;

        match result {
            Err(err @ DetectionError::Transfer { stage: "upload", .. }) => {
                assert_eq!(err.details(), Some(serde_json::json!("disk full")));
            }
            other => panic!("Expected Transfer error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_job_sends_url_list() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/aidetector/"))
            .and(body_json(serde_json::json!({
                "audioUrlList": ["https://files.example/st-1"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "job-9" })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let job_id = test_client(&mock_server)
            .submit_job(&AccessToken::new("tok"), "https://files.example/st-1")
            .await
            .unwrap();
        assert_eq!(job_id, "job-9");
    }

    #[tokio::test]
    async fn test_job_status_success_takes_first_result() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aidetector/job-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "job_infos": {
                    "job_status": "success",
                    "report_info": { "report": { "resultList": [
                        { "isAi": true, "confidence": 87 },
                        { "isAi": false, "confidence": 3 }
                    ] } }
                }
            })))
            .mount(&mock_server)
            .await;

        let status = test_client(&mock_server)
            .job_status(&AccessToken::new("tok"), "job-9")
            .await
            .unwrap();
        assert_eq!(
            status,
            JobStatus::Succeeded(DetectionResult {
                is_ai: true,
                confidence: serde_json::Number::from(87)
            })
        );
    }

    #[test]
    fn test_parse_job_status_variants() {
        let running = parse_job_status(serde_json::json!({
            "job_infos": { "job_status": "processing" }
        }))
        .unwrap();
        assert_eq!(running, JobStatus::Running("processing".to_string()));

        let failed = parse_job_status(serde_json::json!({
            "job_infos": { "job_status": "error" }
        }))
        .unwrap();
        assert!(matches!(failed, JobStatus::Failed(Some(_))));

        let empty = parse_job_status(serde_json::json!({
            "job_infos": { "job_status": "success", "report_info": { "report": { "resultList": [] } } }
        }));
        assert!(matches!(
            empty,
            Err(DetectionError::UnexpectedPayload { stage: "status", .. })
        ));

        let malformed = parse_job_status(serde_json::json!({ "unexpected": true }));
        assert!(matches!(malformed, Err(DetectionError::UnexpectedPayload { .. })));
    }
}
