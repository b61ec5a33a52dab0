//! # Dispatcher
//!
//! Accepts sync trigger requests for a `(project, kind)` pair, decides between
//! accepting a new job and deduplicating onto the active one, and hands
//! accepted jobs to a [`JobLauncher`] without waiting for them.

use std::sync::Arc;

use metrics::counter;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::availability::AvailabilityTracker;
use crate::connectors::Registry;
use crate::models::project::Model as Project;
use crate::models::sync_job::{JobKind, JobStatus, Model as SyncJob};
use crate::repositories::{CreateOutcome, ProjectRepository, StoreError, SyncJobRepository};

/// Receives accepted jobs for asynchronous execution.
pub trait JobLauncher: Send + Sync {
    fn launch(&self, job: SyncJob);
}

/// Errors returned by [`Dispatcher::trigger`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("project {0} not found")]
    ProjectNotFound(Uuid),
    #[error("{} integration is not configured", kind.display_name())]
    Unconfigured { kind: JobKind },
    #[error("{} integration is temporarily unavailable", kind.display_name())]
    Unavailable { kind: JobKind, retry_after_secs: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DbErr> for DispatchError {
    fn from(err: DbErr) -> Self {
        DispatchError::Store(StoreError::Database(err))
    }
}

/// Result of one trigger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
    pub accepted: bool,
    pub deduplicated: bool,
}

/// Results of a full sync, one entry per kind in [`JobKind::ALL`] order.
#[derive(Debug)]
pub struct FullSyncOutcome {
    pub per_kind: Vec<(JobKind, Result<TriggerOutcome, DispatchError>)>,
}

/// Sync job dispatcher
#[derive(Clone)]
pub struct Dispatcher {
    projects: ProjectRepository,
    jobs: SyncJobRepository,
    registry: Arc<Registry>,
    availability: Arc<AvailabilityTracker>,
    launcher: Arc<dyn JobLauncher>,
}

impl Dispatcher {
    pub fn new(
        projects: ProjectRepository,
        jobs: SyncJobRepository,
        registry: Arc<Registry>,
        availability: Arc<AvailabilityTracker>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        Self {
            projects,
            jobs,
            registry,
            availability,
            launcher,
        }
    }

    /// Trigger a sync of `kind` for `project_id`.
    ///
    /// At most one job per `(project_id, kind)` is ever active; a trigger that
    /// finds one returns it with `deduplicated = true` and launches nothing.
    #[instrument(skip_all, fields(project_id = %project_id, job_kind = %kind))]
    pub async fn trigger(
        &self,
        project_id: Uuid,
        kind: JobKind,
        requested_by: Option<Uuid>,
    ) -> Result<TriggerOutcome, DispatchError> {
        let project = self.load_project(project_id).await?;
        self.trigger_for(&project, kind, requested_by).await
    }

    /// Trigger both kinds independently. Kinds that are unconfigured or
    /// unavailable report that inline; storage errors abort the whole call.
    #[instrument(skip_all, fields(project_id = %project_id))]
    pub async fn trigger_full(
        &self,
        project_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<FullSyncOutcome, DispatchError> {
        let project = self.load_project(project_id).await?;

        let mut per_kind = Vec::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            match self.trigger_for(&project, kind, requested_by).await {
                Ok(outcome) => per_kind.push((kind, Ok(outcome))),
                Err(
                    err @ (DispatchError::Unconfigured { .. }
                    | DispatchError::Unavailable { .. }),
                ) => per_kind.push((kind, Err(err))),
                Err(err) => return Err(err),
            }
        }

        Ok(FullSyncOutcome { per_kind })
    }

    async fn load_project(&self, project_id: Uuid) -> Result<Project, DispatchError> {
        self.projects
            .find(project_id)
            .await?
            .ok_or(DispatchError::ProjectNotFound(project_id))
    }

    async fn trigger_for(
        &self,
        project: &Project,
        kind: JobKind,
        requested_by: Option<Uuid>,
    ) -> Result<TriggerOutcome, DispatchError> {
        if !self.registry.contains(kind) {
            counter!("sync_triggers_total", "kind" => kind.as_str(), "outcome" => "unconfigured")
                .increment(1);
            return Err(DispatchError::Unconfigured { kind });
        }

        // A cooldown only refuses new work; an active job is still reported.
        if let Some(job) = self.jobs.find_active(project.id, kind).await? {
            return Ok(self.deduplicated(project, kind, job));
        }

        if let Some(retry_after_secs) = self.availability.retry_after(kind) {
            counter!("sync_triggers_total", "kind" => kind.as_str(), "outcome" => "unavailable")
                .increment(1);
            return Err(DispatchError::Unavailable {
                kind,
                retry_after_secs,
            });
        }

        match self.jobs.create_queued(project.id, kind, requested_by).await? {
            CreateOutcome::Created(job) => {
                counter!("sync_triggers_total", "kind" => kind.as_str(), "outcome" => "accepted")
                    .increment(1);
                info!(
                    job_id = %job.id,
                    project_id = %project.id,
                    job_kind = %kind,
                    status = %job.status,
                    requested_by = ?requested_by,
                    "Sync job accepted"
                );

                let outcome = TriggerOutcome {
                    job_id: job.id,
                    status: job.status,
                    message: format!("{} sync queued", kind.display_name()),
                    accepted: true,
                    deduplicated: false,
                };
                self.launcher.launch(job);
                Ok(outcome)
            }
            CreateOutcome::Existing(job) => Ok(self.deduplicated(project, kind, job)),
        }
    }

    fn deduplicated(&self, project: &Project, kind: JobKind, job: SyncJob) -> TriggerOutcome {
        counter!("sync_triggers_total", "kind" => kind.as_str(), "outcome" => "deduplicated")
            .increment(1);
        info!(
            job_id = %job.id,
            project_id = %project.id,
            job_kind = %kind,
            status = %job.status,
            "Sync already in progress; trigger deduplicated"
        );

        TriggerOutcome {
            job_id: job.id,
            status: job.status,
            message: format!("{} sync already in progress", kind.display_name()),
            accepted: false,
            deduplicated: true,
        }
    }
}
