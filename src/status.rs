//! # Status Aggregator
//!
//! Read-only consolidated view of a project's sync state: per kind, whether
//! the integration is usable, the active job and the last finished job, plus
//! the overall `last_synced_at` across both kinds.
//!
//! The aggregator always returns full job errors. Redacting them for viewers
//! without internal visibility happens at the HTTP boundary via [`redact`].

use std::str::FromStr;
use std::sync::Arc;

use sea_orm::DbErr;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connectors::Registry;
use crate::models::project::Model as Project;
use crate::models::sync_job::{JobKind, JobStatus, JobSummary};
use crate::repositories::{ProjectRepository, StoreError, SyncJobRepository};

/// Error text shown to viewers without internal visibility.
pub const REDACTED_ERROR: &str = "Sync failed";

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("project {0} not found")]
    ProjectNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DbErr> for StatusError {
    fn from(err: DbErr) -> Self {
        StatusError::Store(StoreError::Database(err))
    }
}

/// Sync state of one integration for one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct KindStatus {
    /// Integration credentials/settings are present
    pub integration_configured: bool,
    /// Project carries the external identifier this integration needs
    pub project_linked: bool,
    /// Queued or running job, if any
    #[serde(default)]
    pub active_job: Option<JobSummary>,
    /// Most recently finished job, if any
    #[serde(default)]
    pub last_job: Option<JobSummary>,
}

impl KindStatus {
    pub fn is_active(&self) -> bool {
        self.active_job.is_some()
    }
}

/// Consolidated sync view for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProjectSyncSummary {
    pub project_id: Uuid,
    /// Latest completion time of a succeeded job of either kind
    #[serde(default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_synced_at: Option<DateTimeWithTimeZone>,
    pub issue_tracker: KindStatus,
    pub resourcing: KindStatus,
}

impl ProjectSyncSummary {
    pub fn kind(&self, kind: JobKind) -> &KindStatus {
        match kind {
            JobKind::IssueTracker => &self.issue_tracker,
            JobKind::Resourcing => &self.resourcing,
        }
    }

    fn kind_mut(&mut self, kind: JobKind) -> &mut KindStatus {
        match kind {
            JobKind::IssueTracker => &mut self.issue_tracker,
            JobKind::Resourcing => &mut self.resourcing,
        }
    }

    /// Whether any kind has a queued or running job.
    pub fn any_active(&self) -> bool {
        JobKind::ALL.iter().any(|kind| self.kind(*kind).is_active())
    }
}

/// Visibility of the caller, resolved upstream of this service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewerScope {
    #[default]
    Internal,
    External,
}

impl FromStr for ViewerScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(ViewerScope::Internal),
            "external" => Ok(ViewerScope::External),
            other => Err(format!("unknown viewer scope '{other}'")),
        }
    }
}

/// Replace failure detail for viewers without internal visibility.
pub fn redact_job(mut job: JobSummary, scope: ViewerScope) -> JobSummary {
    if scope == ViewerScope::External && job.status == JobStatus::Failed && job.error.is_some() {
        job.error = Some(REDACTED_ERROR.to_string());
    }
    job
}

pub fn redact(mut summary: ProjectSyncSummary, scope: ViewerScope) -> ProjectSyncSummary {
    for kind in JobKind::ALL {
        let status = summary.kind_mut(kind);
        status.last_job = status.last_job.take().map(|job| redact_job(job, scope));
        status.active_job = status.active_job.take().map(|job| redact_job(job, scope));
    }
    summary
}

/// Builds [`ProjectSyncSummary`] values from the job store.
#[derive(Clone)]
pub struct StatusService {
    projects: ProjectRepository,
    jobs: SyncJobRepository,
    registry: Arc<Registry>,
}

impl StatusService {
    pub fn new(
        projects: ProjectRepository,
        jobs: SyncJobRepository,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            projects,
            jobs,
            registry,
        }
    }

    #[instrument(skip_all, fields(project_id = %project_id))]
    pub async fn get_summary(&self, project_id: Uuid) -> Result<ProjectSyncSummary, StatusError> {
        let project = self
            .projects
            .find(project_id)
            .await?
            .ok_or(StatusError::ProjectNotFound(project_id))?;

        Ok(ProjectSyncSummary {
            project_id,
            last_synced_at: self.jobs.last_synced_at(project_id).await?,
            issue_tracker: self.kind_status(&project, JobKind::IssueTracker).await?,
            resourcing: self.kind_status(&project, JobKind::Resourcing).await?,
        })
    }

    async fn kind_status(
        &self,
        project: &Project,
        kind: JobKind,
    ) -> Result<KindStatus, StatusError> {
        let active_job = self.jobs.find_active(project.id, kind).await?;
        let last_job = self.jobs.last_terminal(project.id, kind).await?;

        Ok(KindStatus {
            integration_configured: self.registry.contains(kind),
            project_linked: project.is_linked(kind),
            active_job: active_job.map(JobSummary::from),
            last_job: last_job.map(JobSummary::from),
        })
    }

    /// Single job lookup.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobSummary>, StatusError> {
        Ok(self.jobs.find(job_id).await?.map(JobSummary::from))
    }

    /// Most recent jobs of a project, newest first.
    pub async fn list_jobs(
        &self,
        project_id: Uuid,
        limit: u64,
    ) -> Result<Vec<JobSummary>, StatusError> {
        if self.projects.find(project_id).await?.is_none() {
            return Err(StatusError::ProjectNotFound(project_id));
        }
        let jobs = self.jobs.list_for_project(project_id, limit).await?;
        Ok(jobs.into_iter().map(JobSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(status: JobStatus, error: Option<&str>) -> JobSummary {
        JobSummary {
            id: Uuid::new_v4(),
            job_type: JobKind::Resourcing,
            status,
            created_at: Utc::now().fixed_offset(),
            started_at: None,
            completed_at: None,
            items_synced: 0,
            error: error.map(str::to_string),
        }
    }

    fn summary(last_job: Option<JobSummary>) -> ProjectSyncSummary {
        let idle = KindStatus {
            integration_configured: true,
            project_linked: true,
            active_job: None,
            last_job: None,
        };
        ProjectSyncSummary {
            project_id: Uuid::new_v4(),
            last_synced_at: None,
            issue_tracker: idle.clone(),
            resourcing: KindStatus { last_job, ..idle },
        }
    }

    #[test]
    fn external_viewers_see_generic_failure() {
        let redacted = redact(
            summary(Some(job(JobStatus::Failed, Some("HTTP 429: quota exceeded")))),
            ViewerScope::External,
        );
        assert_eq!(
            redacted.resourcing.last_job.unwrap().error.as_deref(),
            Some(REDACTED_ERROR)
        );
    }

    #[test]
    fn internal_viewers_keep_error_detail() {
        let redacted = redact(
            summary(Some(job(JobStatus::Failed, Some("HTTP 429: quota exceeded")))),
            ViewerScope::Internal,
        );
        assert_eq!(
            redacted.resourcing.last_job.unwrap().error.as_deref(),
            Some("HTTP 429: quota exceeded")
        );
    }

    #[test]
    fn viewer_scope_parses_case_insensitively() {
        assert_eq!("External".parse::<ViewerScope>(), Ok(ViewerScope::External));
        assert_eq!(" internal ".parse::<ViewerScope>(), Ok(ViewerScope::Internal));
        assert!("admin".parse::<ViewerScope>().is_err());
    }

    #[test]
    fn any_active_checks_both_kinds() {
        let mut view = summary(None);
        assert!(!view.any_active());
        view.issue_tracker.active_job = Some(job(JobStatus::Running, None));
        assert!(view.any_active());
    }
}
