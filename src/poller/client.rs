//! HTTP client for the sync API, used by observers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::auth::{ACTOR_ID_HEADER, VIEWER_SCOPE_HEADER};
use crate::handlers::sync::TriggerResponse;
use crate::models::sync_job::JobKind;
use crate::status::{ProjectSyncSummary, ViewerScope};

#[derive(Debug, Error)]
pub enum PollError {
    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),
    /// The API answered with an error body
    #[error("{status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        retry_after: Option<u64>,
    },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),
}

impl PollError {
    /// Integration not configured or temporarily unavailable.
    pub fn is_integration_unavailable(&self) -> bool {
        matches!(
            self,
            PollError::Api { code, .. }
                if code == "INTEGRATION_NOT_CONFIGURED" || code == "INTEGRATION_UNAVAILABLE"
        )
    }
}

impl From<reqwest::Error> for PollError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PollError::Decode(err.to_string())
        } else {
            PollError::Transport(err.to_string())
        }
    }
}

/// Where observers read summaries from and send triggers to.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_summary(&self, project_id: Uuid) -> Result<ProjectSyncSummary, PollError>;

    async fn trigger(&self, project_id: Uuid, kind: JobKind) -> Result<TriggerResponse, PollError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    retry_after: Option<u64>,
}

/// [`StatusSource`] over the service's HTTP API
#[derive(Clone)]
pub struct HttpSyncClient {
    client: reqwest::Client,
    base_url: Url,
    actor_id: Option<Uuid>,
    viewer_scope: ViewerScope,
}

impl HttpSyncClient {
    pub fn new(base_url: &str) -> Result<Self, PollError> {
        let mut base_url =
            Url::parse(base_url).map_err(|err| PollError::InvalidUrl(err.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url,
            actor_id: None,
            viewer_scope: ViewerScope::Internal,
        })
    }

    /// Send `X-Actor-Id` on triggers.
    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_viewer_scope(mut self, scope: ViewerScope) -> Self {
        self.viewer_scope = scope;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, PollError> {
        self.base_url
            .join(path)
            .map_err(|err| PollError::InvalidUrl(err.to_string()))
    }

    fn trigger_path(project_id: Uuid, kind: JobKind) -> String {
        let segment = match kind {
            JobKind::IssueTracker => "issue-tracker",
            JobKind::Resourcing => "resourcing",
        };
        format!("sync/{project_id}/{segment}")
    }

    async fn read_error(resp: reqwest::Response) -> PollError {
        let status = resp.status();
        match resp.json::<ErrorBody>().await {
            Ok(body) => PollError::Api {
                status: status.as_u16(),
                code: body.code,
                message: body.message,
                retry_after: body.retry_after,
            },
            Err(_) => PollError::Api {
                status: status.as_u16(),
                code: status.canonical_reason().unwrap_or("UNKNOWN").to_string(),
                message: format!("request failed with status {}", status.as_u16()),
                retry_after: None,
            },
        }
    }
}

#[async_trait]
impl StatusSource for HttpSyncClient {
    async fn fetch_summary(&self, project_id: Uuid) -> Result<ProjectSyncSummary, PollError> {
        let scope = match self.viewer_scope {
            ViewerScope::Internal => "internal",
            ViewerScope::External => "external",
        };
        let resp = self
            .client
            .get(self.endpoint(&format!("sync/{project_id}/status"))?)
            .header(VIEWER_SCOPE_HEADER, scope)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(Self::read_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn trigger(&self, project_id: Uuid, kind: JobKind) -> Result<TriggerResponse, PollError> {
        let mut request = self
            .client
            .post(self.endpoint(&Self::trigger_path(project_id, kind))?);
        if let Some(actor_id) = self.actor_id {
            request = request.header(ACTOR_ID_HEADER, actor_id.to_string());
        }
        let resp = request.send().await?;

        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_without_trailing_slash_keeps_its_path() {
        let client = HttpSyncClient::new("http://localhost:8080/api").unwrap();
        let url = client.endpoint("sync/jobs/abc").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/sync/jobs/abc");
    }

    #[test]
    fn trigger_paths_per_kind() {
        let project_id = Uuid::nil();
        assert_eq!(
            HttpSyncClient::trigger_path(project_id, JobKind::IssueTracker),
            format!("sync/{project_id}/issue-tracker")
        );
        assert_eq!(
            HttpSyncClient::trigger_path(project_id, JobKind::Resourcing),
            format!("sync/{project_id}/resourcing")
        );
    }

    #[test]
    fn integration_errors_are_recognized() {
        let err = PollError::Api {
            status: 503,
            code: "INTEGRATION_UNAVAILABLE".to_string(),
            message: "try again later".to_string(),
            retry_after: Some(30),
        };
        assert!(err.is_integration_unavailable());
        assert!(!PollError::Transport("reset".to_string()).is_integration_unavailable());
    }
}
