//! Precursive connector implementation
//!
//! Resourcing system sync over the Salesforce REST query API. The project's
//! Precursive record is looked up by id; the record count is the item count.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use tracing::info;

use crate::config::ResourcingConfig;
use crate::connectors::jira::{retry_after_header, truncate_body};
use crate::connectors::trait_::{
    ConnectorError, SyncConnector, SyncError, SyncOutcome, SyncParams,
};
use crate::models::sync_job::JobKind;

const PROJECT_SOBJECT: &str = "preempt__PrecursiveProject__c";
const PROJECT_FIELDS: &str = "Id, Name, preempt__Status__c, Project_Status_Pick__c, \
    Time_Status_Pick__c, Cost_Status_Pick__c, Resources_Status_Pick__c, Remaining_Budget__c";

static SALESFORCE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]{15}(?:[a-zA-Z0-9]{3})?$").expect("valid regex"));

/// Precursive connector
pub struct PrecursiveConnector {
    client: reqwest::Client,
    instance_url: String,
    access_token: String,
    api_version: String,
}

#[derive(Debug, serde::Deserialize)]
struct QueryResponse {
    #[serde(rename = "totalSize")]
    total_size: i64,
    #[serde(default)]
    records: Vec<serde_json::Value>,
}

impl PrecursiveConnector {
    pub fn new(
        instance_url: String,
        access_token: String,
        api_version: String,
    ) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            api_version,
        })
    }

    /// Build from configuration; `None` when the integration is not configured.
    pub fn from_config(config: &ResourcingConfig) -> Result<Option<Self>, ConnectorError> {
        if !config.is_configured() {
            return Ok(None);
        }
        match (&config.instance_url, &config.access_token) {
            (Some(url), Some(token)) => {
                Self::new(url.clone(), token.clone(), config.api_version.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn query(&self, soql: &str) -> Result<QueryResponse, ConnectorError> {
        let url = format!("{}/services/data/{}/query", self.instance_url, self.api_version);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("q", soql)])
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

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SyncConnector for PrecursiveConnector {
    fn kind(&self) -> JobKind {
        JobKind::Resourcing
    }

    async fn sync(&self, params: SyncParams) -> Result<SyncOutcome, SyncError> {
        let record_id = params.project.resourcing_id().ok_or_else(|| {
            SyncError::permanent("Project is not linked to a resourcing record")
        })?;

        // Ids are interpolated into SOQL
        if !SALESFORCE_ID.is_match(&record_id) {
            let display: String = record_id.chars().take(20).collect();
            return Err(SyncError::permanent(format!(
                "Invalid resourcing record id: {}",
                display
            )));
        }

        info!(
            job_id = %params.job_id,
            project_id = %params.project.id,
            record_id = %record_id,
            "Starting Precursive project sync"
        );

        let soql = format!(
            "SELECT {} FROM {} WHERE Id = '{}'",
            PROJECT_FIELDS, PROJECT_SOBJECT, record_id
        );
        let response = self.query(&soql).await?;

        if response.total_size == 0 || response.records.is_empty() {
            return Err(SyncError::permanent(format!(
                "Resourcing record {} not found",
                record_id
            )));
        }

        let items_synced = response.records.len() as i64;
        params.progress.report(items_synced).await;

        info!(
            job_id = %params.job_id,
            project_id = %params.project.id,
            items_synced,
            "Precursive project sync completed"
        );

        Ok(SyncOutcome { items_synced })
    }
}
