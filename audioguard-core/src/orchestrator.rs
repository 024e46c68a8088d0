//! Upload Orchestrator: drives one file through the external detection pipeline.
//!
//! Steps, in order: quota check, validation, authenticate, provision storage,
//! transfer, resolve access URL, submit job, poll, persist. Any failure aborts
//! the sequence; nothing is retried and external resources created by earlier
//! steps are left in place.
//!
//! Polling is bounded by `max_poll_attempts` and the whole external phase stops
//! as soon as the caller's `CancellationToken` fires.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, DetectionConfig, UploadConfig};
use crate::detection::{
    AccessToken, AudioFile, DetectionError, DetectionResult, DetectionService, JobStatus,
};
use crate::error::{UploadError, ValidationError};
use crate::models::{NewUploadRecord, UploadRecord};
use crate::quota::{QuotaPolicy, QuotaTracker};
use crate::store::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&DetectionConfig> for PollSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_poll_attempts,
        }
    }
}

/// One upload as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub session_id: String,
    pub ip_address: Option<String>,
    /// `None` when the form carried no file field.
    pub file: Option<AudioFile>,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub result: DetectionResult,
    /// `None` means unlimited (non-production).
    pub uploads_remaining: Option<u32>,
    pub record: UploadRecord,
}

/// Identifiers produced by the external phase.
#[derive(Debug, Clone)]
struct Detection {
    storage_id: String,
    result: DetectionResult,
}

/// Intermediate poll outcome; only `Pending` is retried.
#[derive(Debug)]
enum PollError {
    Pending(String),
    Fatal(DetectionError),
}

pub struct UploadOrchestrator {
    detector: Arc<dyn DetectionService>,
    store: Arc<dyn ResultStore>,
    quota: QuotaTracker,
    limits: UploadConfig,
    poll: PollSettings,
}

impl UploadOrchestrator {
    pub fn new(
        config: &AppConfig,
        detector: Arc<dyn DetectionService>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let quota = QuotaTracker::new(store.clone(), QuotaPolicy::from_config(config));
        Self {
            detector,
            store,
            quota,
            limits: config.upload.clone(),
            poll: PollSettings::from(&config.detection),
        }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Reject missing, empty, oversize or non-audio files. Makes no external call.
    pub fn validate<'a>(&self, file: Option<&'a AudioFile>) -> Result<&'a AudioFile, ValidationError> {
        let file = file.ok_or(ValidationError::MissingFile)?;

        let mime = file
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if !self.limits.allowed_mime_types.iter().any(|m| m.eq_ignore_ascii_case(&mime)) {
            return Err(ValidationError::UnsupportedMimeType(file.content_type.clone()));
        }

        if file.size() == 0 {
            return Err(ValidationError::EmptyFile);
        }
        if file.size() > self.limits.max_file_size_bytes {
            return Err(ValidationError::FileTooLarge {
                size: file.size(),
                limit: self.limits.max_file_size_bytes,
            });
        }

        Ok(file)
    }

    /// Run the full pipeline for one upload.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(session_id = %request.session_id, detector = self.detector.name())
    )]
    pub async fn process(
        &self,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let started = Instant::now();

        let result = self.run(&request, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => tracing::info!(
                elapsed_ms,
                is_ai = outcome.result.is_ai,
                confidence = %outcome.result.confidence,
                uploads_remaining = ?outcome.uploads_remaining,
                "Upload analysed"
            ),
            Err(UploadError::Validation(e)) => {
                tracing::warn!(elapsed_ms, error = %e, "Upload rejected by validation")
            }
            Err(e) => tracing::error!(
                elapsed_ms,
                error = %e,
                details = ?e.details(),
                "Upload processing failed"
            ),
        }

        result
    }

    async fn run(
        &self,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let prior_count = self.quota.ensure_allowed(&request.session_id).await?;
        let file = self.validate(request.file.as_ref())?;

        let detection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DetectionError::Cancelled.into()),
            res = self.detect(file) => res?,
        };

        let record = self
            .store
            .insert(NewUploadRecord {
                session_id: request.session_id.clone(),
                ip_address: request.ip_address.clone(),
                file_name: file.file_name.clone(),
                external_file_id: detection.storage_id,
                is_ai: detection.result.is_ai,
                confidence: detection.result.confidence.clone(),
            })
            .await?;

        // The record is already stored; a failed recount must not fail the upload.
        let uploads_remaining = match self.quota.remaining(&request.session_id).await {
            Ok(remaining) => remaining,
            Err(e) => {
                let estimate = self.quota.remaining_after_upload(prior_count);
                tracing::warn!(
                    error = %e,
                    estimate = ?estimate,
                    "Recount after upload failed, using pre-upload count"
                );
                estimate
            }
        };

        Ok(UploadOutcome {
            result: detection.result,
            uploads_remaining,
            record,
        })
    }

    /// Steps 2–7: everything that talks to the external services.
    async fn detect(&self, file: &AudioFile) -> Result<Detection, DetectionError> {
        let token = self.detector.authenticate().await?;
        tracing::debug!("Authenticated with detection service");

        let storage_id = self.detector.provision_storage(&token).await?;
        self.detector.upload_file(&token, &storage_id, file).await?;
        let access_url = self.detector.resolve_access_url(&token, &storage_id).await?;

        let job_id = self.detector.submit_job(&token, &access_url).await?;
        let result = self.poll_job(&token, &job_id).await?;

        Ok(Detection { storage_id, result })
    }

    async fn poll_job(
        &self,
        token: &AccessToken,
        job_id: &str,
    ) -> Result<DetectionResult, DetectionError> {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let detector = self.detector.as_ref();

        // First check is immediate; the strategy only spaces out the follow-ups.
        let strategy = FixedInterval::new(self.poll.interval)
            .take(self.poll.max_attempts.saturating_sub(1) as usize);

        let outcome = RetryIf::spawn(
            strategy,
            || async move {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                match detector.job_status(token, job_id).await {
                    Ok(JobStatus::Succeeded(result)) => Ok(result),
                    Ok(JobStatus::Failed(details)) => Err(PollError::Fatal(DetectionError::Processing {
                        job_id: job_id.to_string(),
                        details,
                    })),
                    Ok(JobStatus::Running(status)) => {
                        tracing::debug!(job_id, attempt, status = %status, "Detection job still running");
                        Err(PollError::Pending(status))
                    }
                    Err(e) => Err(PollError::Fatal(e)),
                }
            },
            |e: &PollError| matches!(e, PollError::Pending(_)),
        )
        .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(PollError::Fatal(e)) => Err(e),
            Err(PollError::Pending(_)) => Err(DetectionError::PollTimeout {
                job_id: job_id.to_string(),
                attempts: counter.load(Ordering::Relaxed),
            }),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
