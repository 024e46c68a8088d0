//! Quota Tracker: per-session upload ceiling.
//!
//! Counts come straight from the `ResultStore` on every call, so the tracker
//! never drifts from persisted history. Two concurrent uploads from one session
//! near the ceiling can both pass `ensure_allowed`; that undercount is accepted.

use std::sync::Arc;

use thiserror::Error;

use crate::config::AppConfig;
use crate::store::{ResultStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Upload limit reached: {count} of {ceiling} uploads used for this session")]
pub struct QuotaExceeded {
    pub count: u32,
    pub ceiling: u32,
}

/// Failure modes of a quota check.
#[derive(Error, Debug)]
pub enum QuotaCheckError {
    #[error(transparent)]
    Exceeded(#[from] QuotaExceeded),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPolicy {
    /// Non-production: never blocks, never consults the store.
    Unlimited,
    /// Production: at most `n` completed uploads per session.
    Ceiling(u32),
}

impl QuotaPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.service.is_production() {
            QuotaPolicy::Ceiling(config.upload.quota_ceiling)
        } else {
            QuotaPolicy::Unlimited
        }
    }

    /// `max(0, ceiling - count)`, or `None` when unlimited.
    pub fn remaining_for(&self, count: u32) -> Option<u32> {
        match self {
            QuotaPolicy::Unlimited => None,
            QuotaPolicy::Ceiling(ceiling) => Some(ceiling.saturating_sub(count)),
        }
    }
}

#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn ResultStore>,
    policy: QuotaPolicy,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn ResultStore>, policy: QuotaPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn count_uploads(&self, session_id: &str) -> Result<u32, StoreError> {
        self.store.count_by_session(session_id).await
    }

    /// Remaining uploads for the session; `None` means unlimited.
    pub async fn remaining(&self, session_id: &str) -> Result<Option<u32>, StoreError> {
        match self.policy {
            QuotaPolicy::Unlimited => Ok(None),
            QuotaPolicy::Ceiling(_) => {
                let count = self.count_uploads(session_id).await?;
                Ok(self.policy.remaining_for(count))
            }
        }
    }

    /// Reject the session once it has used its ceiling. Returns the prior
    /// count, or `None` when unlimited (the store is not consulted).
    pub async fn ensure_allowed(&self, session_id: &str) -> Result<Option<u32>, QuotaCheckError> {
        let QuotaPolicy::Ceiling(ceiling) = self.policy else {
            return Ok(None);
        };

        let count = self.count_uploads(session_id).await?;
        if count >= ceiling {
            tracing::info!(session_id, count, ceiling, "Upload rejected: quota exhausted");
            return Err(QuotaExceeded { count, ceiling }.into());
        }
        Ok(Some(count))
    }

    /// Remaining uploads assuming exactly one upload landed after `prior_count`.
    pub fn remaining_after_upload(&self, prior_count: Option<u32>) -> Option<u32> {
        self.policy
            .remaining_for(prior_count.unwrap_or(0).saturating_add(1))
    }
}
