//! Connector trait definition
//!
//! Defines the interface a worker uses to run one integration's sync for one
//! project, plus the error classification the worker acts on.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::project::Model as Project;
use crate::models::sync_job::JobKind;
use crate::repositories::SyncJobRepository;

/// Transport-level failures raised while talking to an upstream system
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// Non-success HTTP status from upstream
    #[error("HTTP error {status}: {}", body.as_deref().unwrap_or("No body"))]
    HttpError {
        status: u16,
        body: Option<String>,
        retry_after: Option<u64>,
    },
    /// Response did not have the expected shape
    #[error("Malformed response: {details}")]
    MalformedResponse { details: String },
    /// Connection refused, DNS failure or request timeout
    #[error("Network error: {details}")]
    NetworkError { details: String },
    /// Project data or settings make the call impossible
    #[error("Configuration error: {details}")]
    ConfigurationError { details: String },
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ConnectorError::MalformedResponse {
                details: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            ConnectorError::HttpError {
                status: status.as_u16(),
                body: None,
                retry_after: None,
            }
        } else {
            ConnectorError::NetworkError {
                details: err.to_string(),
            }
        }
    }
}

/// Sync failure with the classification used for availability tracking
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SyncError {
    #[serde(flatten)]
    pub kind: SyncErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Credentials rejected upstream
    Unauthorized,
    /// Rate limited with optional retry after hint
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    /// Upstream could not be reached at all
    Unreachable,
    /// Upstream answered with a server-side error
    Transient,
    /// Request can never succeed as issued
    Permanent,
}

impl SyncError {
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self {
            kind: SyncErrorKind::Unauthorized,
            message: Some(message.into()),
        }
    }

    pub fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        Self {
            kind: SyncErrorKind::RateLimited { retry_after_secs },
            message: None,
        }
    }

    pub fn unreachable<S: Into<String>>(message: S) -> Self {
        Self {
            kind: SyncErrorKind::Unreachable,
            message: Some(message.into()),
        }
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self {
            kind: SyncErrorKind::Transient,
            message: Some(message.into()),
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self {
            kind: SyncErrorKind::Permanent,
            message: Some(message.into()),
        }
    }

    /// Whether the integration as a whole should be treated as unavailable.
    /// Returns the upstream retry hint when one was given.
    pub fn unavailability(&self) -> Option<Option<u64>> {
        match self.kind {
            SyncErrorKind::RateLimited { retry_after_secs } => Some(retry_after_secs),
            SyncErrorKind::Unreachable => Some(None),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SyncErrorKind::Unauthorized => write!(f, "Unauthorized")?,
            SyncErrorKind::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(after) = retry_after_secs {
                    write!(f, " (retry after: {}s)", after)?;
                }
            }
            SyncErrorKind::Unreachable => write!(f, "Unreachable")?,
            SyncErrorKind::Transient => write!(f, "Transient error")?,
            SyncErrorKind::Permanent => write!(f, "Permanent error")?,
        }
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncError {}

impl From<ConnectorError> for SyncError {
    fn from(connector_error: ConnectorError) -> Self {
        match connector_error {
            ConnectorError::HttpError {
                status,
                body,
                retry_after,
            } => {
                let detail = format!("HTTP error {}: {}", status, body.unwrap_or_default());
                match status {
                    429 => SyncError::rate_limited(retry_after),
                    401 | 403 => SyncError::unauthorized(detail),
                    400..=499 => SyncError::permanent(detail),
                    _ => SyncError::transient(detail),
                }
            }
            ConnectorError::MalformedResponse { details } => {
                SyncError::transient(format!("Malformed response: {}", details))
            }
            ConnectorError::NetworkError { details } => SyncError::unreachable(details),
            ConnectorError::ConfigurationError { details } => SyncError::permanent(details),
        }
    }
}

/// Progress reporter handed to a connector for the duration of one job.
///
/// Counts are clamped to the highest value reported so far, and the store
/// ignores anything lower than what it already holds.
#[derive(Clone)]
pub struct JobProgress {
    job_id: Uuid,
    store: Option<SyncJobRepository>,
    high_water: Arc<AtomicI64>,
}

impl JobProgress {
    pub fn new(job_id: Uuid, store: SyncJobRepository) -> Self {
        Self {
            job_id,
            store: Some(store),
            high_water: Arc::new(AtomicI64::new(0)),
        }
    }

    /// A reporter that only tracks the count in memory.
    pub fn detached(job_id: Uuid) -> Self {
        Self {
            job_id,
            store: None,
            high_water: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Highest count reported so far.
    pub fn current(&self) -> i64 {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Record that `items_synced` records have been pulled so far.
    pub async fn report(&self, items_synced: i64) {
        let previous = self.high_water.fetch_max(items_synced, Ordering::SeqCst);
        if items_synced <= previous {
            return;
        }
        if let Some(store) = &self.store
            && let Err(err) = store.record_progress(self.job_id, items_synced).await
        {
            tracing::warn!(
                job_id = %self.job_id,
                items_synced,
                error = %err,
                "Failed to persist sync progress"
            );
        }
    }
}

/// Parameters for one sync run
#[derive(Clone)]
pub struct SyncParams {
    pub job_id: Uuid,
    pub project: Project,
    pub progress: JobProgress,
}

/// Result of a successful sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub items_synced: i64,
}

#[async_trait]
pub trait SyncConnector: Send + Sync {
    /// Integration this connector serves.
    fn kind(&self) -> JobKind;

    /// Pull the project's data from the upstream system.
    async fn sync(&self, params: SyncParams) -> Result<SyncOutcome, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification() {
        let err: SyncError = ConnectorError::HttpError {
            status: 429,
            body: None,
            retry_after: Some(30),
        }
        .into();
        assert_eq!(
            err.kind,
            SyncErrorKind::RateLimited {
                retry_after_secs: Some(30)
            }
        );
        assert_eq!(err.unavailability(), Some(Some(30)));

        let err: SyncError = ConnectorError::HttpError {
            status: 401,
            body: Some("bad token".to_string()),
            retry_after: None,
        }
        .into();
        assert_eq!(err.kind, SyncErrorKind::Unauthorized);
        assert_eq!(err.unavailability(), None);

        let err: SyncError = ConnectorError::HttpError {
            status: 502,
            body: None,
            retry_after: None,
        }
        .into();
        assert_eq!(err.kind, SyncErrorKind::Transient);
    }

    #[test]
    fn network_errors_mark_upstream_unreachable() {
        let err: SyncError = ConnectorError::NetworkError {
            details: "connection refused".to_string(),
        }
        .into();
        assert_eq!(err.kind, SyncErrorKind::Unreachable);
        assert_eq!(err.unavailability(), Some(None));
        assert_eq!(err.to_string(), "Unreachable: connection refused");
    }

    #[tokio::test]
    async fn detached_progress_keeps_high_water_mark() {
        let progress = JobProgress::detached(Uuid::new_v4());
        progress.report(10).await;
        progress.report(4).await;
        assert_eq!(progress.current(), 10);
        progress.report(12).await;
        assert_eq!(progress.current(), 12);
    }
}
