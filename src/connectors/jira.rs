//! Jira connector implementation
//!
//! Issue tracker sync against Jira Cloud using API-token basic auth. Pages
//! through the project's issues with the JQL search endpoint and reports the
//! running count as progress.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::config::IssueTrackerConfig;
use crate::connectors::trait_::{
    ConnectorError, SyncConnector, SyncError, SyncOutcome, SyncParams,
};
use crate::models::sync_job::JobKind;

const PAGE_SIZE: u32 = 100;
/// Upper bound on issues pulled in a single job
const MAX_ISSUES: usize = 1000;
const SEARCH_FIELDS: &str = "summary,status,issuetype,assignee,priority,created,updated,duedate";

/// Jira connector
pub struct JiraConnector {
    client: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
}

impl JiraConnector {
    /// Create a new Jira connector with API-token credentials
    pub fn new(base_url: String, email: String, api_token: String) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            api_token,
        })
    }

    /// Build from configuration; `None` when the integration is not configured.
    pub fn from_config(config: &IssueTrackerConfig) -> Result<Option<Self>, ConnectorError> {
        if !config.is_configured() {
            return Ok(None);
        }
        match (&config.base_url, &config.email, &config.api_token) {
            (Some(base_url), Some(email), Some(token)) => {
                Self::new(base_url.clone(), email.clone(), token.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn search_page(
        &self,
        jql: &str,
        start_at: u32,
    ) -> Result<Vec<serde_json::Value>, ConnectorError> {
        let url = format!("{}/rest/api/3/search/jql", self.base_url);
        let start_at = start_at.to_string();
        let max_results = PAGE_SIZE.to_string();
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .query(&[
                ("jql", jql),
                ("startAt", start_at.as_str()),
                ("maxResults", max_results.as_str()),
                ("fields", SEARCH_FIELDS),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let retry_after = retry_after_header(&resp);
            let body = resp.text().await.ok().map(truncate_body);
            return Err(ConnectorError::HttpError {
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        let body: serde_json::Value = resp.json().await?;
        // Newer responses batch results under `responses[0].issues`
        let issues = body
            .get("responses")
            .and_then(|r| r.get(0))
            .and_then(|first| first.get("issues"))
            .or_else(|| body.get("issues"))
            .and_then(|v| v.as_array())
            .cloned()
            .ok_or_else(|| ConnectorError::MalformedResponse {
                details: "search response has no issues array".to_string(),
            })?;
        Ok(issues)
    }
}

pub(crate) fn retry_after_header(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

pub(crate) fn truncate_body(body: String) -> String {
    if body.chars().count() > 200 {
        let truncated: String = body.chars().take(200).collect();
        format!("{}...", truncated)
    } else {
        body
    }
}

#[async_trait]
impl SyncConnector for JiraConnector {
    fn kind(&self) -> JobKind {
        JobKind::IssueTracker
    }

    async fn sync(&self, params: SyncParams) -> Result<SyncOutcome, SyncError> {
        let project_key = params.project.issue_tracker_key().ok_or_else(|| {
            SyncError::permanent("Project is not linked to an issue tracker project")
        })?;

        info!(
            job_id = %params.job_id,
            project_id = %params.project.id,
            project_key = %project_key,
            "Starting Jira issue sync"
        );

        let jql = format!("project = {} ORDER BY created DESC", project_key);
        let mut start_at = 0u32;
        let mut total = 0usize;

        loop {
            let issues = self.search_page(&jql, start_at).await?;
            let fetched = issues.len();
            total += fetched;
            params.progress.report(total as i64).await;

            debug!(
                job_id = %params.job_id,
                start_at,
                fetched,
                "Fetched Jira issue page"
            );

            if fetched < PAGE_SIZE as usize || total >= MAX_ISSUES {
                break;
            }
            start_at += fetched as u32;
        }

        let items_synced = total.min(MAX_ISSUES) as i64;
        info!(
            job_id = %params.job_id,
            project_id = %params.project.id,
            items_synced,
            "Jira issue sync completed"
        );

        Ok(SyncOutcome { items_synced })
    }
}
