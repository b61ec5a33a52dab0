//! # Sync Worker
//!
//! Executes accepted jobs: `queued -> running`, one connector call bounded by
//! a timeout, then exactly one terminal transition. Concurrency is limited by
//! a semaphore; jobs waiting for a permit stay `queued`.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::availability::AvailabilityTracker;
use crate::config::WorkerConfig;
use crate::connectors::{JobProgress, Registry, SyncError, SyncParams};
use crate::dispatcher::JobLauncher;
use crate::models::sync_job::{JobKind, JobStatus, Model as SyncJob};
use crate::repositories::{ProjectRepository, StoreError, SyncJobRepository};

/// How a single execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Succeeded { items_synced: i64 },
    Failed { error: String },
    /// The job was no longer queued when the worker picked it up, or it was
    /// already terminal when the worker tried to finish it.
    Skipped,
}

/// Background sync worker
#[derive(Clone)]
pub struct Worker {
    jobs: SyncJobRepository,
    projects: ProjectRepository,
    registry: Arc<Registry>,
    availability: Arc<AvailabilityTracker>,
    permits: Arc<Semaphore>,
    max_run: Duration,
}

impl Worker {
    pub fn new(
        jobs: SyncJobRepository,
        projects: ProjectRepository,
        registry: Arc<Registry>,
        availability: Arc<AvailabilityTracker>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            projects,
            registry,
            availability,
            permits: Arc::new(Semaphore::new(config.concurrency as usize)),
            max_run: Duration::from_secs(config.max_run_seconds),
        }
    }

    /// Spawn execution of `job` once a permit is available.
    pub fn spawn(&self, job: SyncJob) -> JoinHandle<JobResult> {
        let worker = self.clone();
        let span = info_span!(
            "sync_job",
            job_id = %job.id,
            project_id = %job.project_id,
            job_kind = %job.job_type
        );
        tokio::spawn(
            async move {
                let Ok(_permit) = worker.permits.clone().acquire_owned().await else {
                    warn!("Worker semaphore closed; leaving job queued");
                    return JobResult::Skipped;
                };
                worker.execute(job.id, job.job_type).await
            }
            .instrument(span),
        )
    }

    /// Run one job to completion on the current task.
    pub async fn execute(&self, job_id: Uuid, kind: JobKind) -> JobResult {
        match self.try_execute(job_id, kind).await {
            Ok(result) => result,
            Err(err) => {
                // The reconciler fails the job once it exceeds its timeout
                error!(job_id = %job_id, error = %err, "Store error while executing sync job");
                JobResult::Skipped
            }
        }
    }

    async fn try_execute(&self, job_id: Uuid, kind: JobKind) -> Result<JobResult, StoreError> {
        if !self.jobs.mark_running(job_id).await? {
            warn!(job_id = %job_id, "Job was not queued when the worker picked it up");
            return Ok(JobResult::Skipped);
        }
        info!(job_id = %job_id, job_kind = %kind, status = %JobStatus::Running, "Sync job started");

        let started = Instant::now();
        let outcome = self.run_connector(job_id, kind).await?;
        histogram!("sync_job_duration_ms", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        let result = match outcome {
            Ok(items_synced) => {
                self.availability.mark_available(kind);
                if self.jobs.mark_succeeded(job_id, items_synced).await? {
                    info!(
                        job_id = %job_id,
                        job_kind = %kind,
                        status = %JobStatus::Succeeded,
                        items_synced,
                        "Sync job succeeded"
                    );
                    JobResult::Succeeded { items_synced }
                } else {
                    JobResult::Skipped
                }
            }
            Err(error) => {
                if self.jobs.mark_failed(job_id, &error).await? {
                    warn!(
                        job_id = %job_id,
                        job_kind = %kind,
                        status = %JobStatus::Failed,
                        error = %error,
                        "Sync job failed"
                    );
                    JobResult::Failed { error }
                } else {
                    JobResult::Skipped
                }
            }
        };

        match &result {
            JobResult::Succeeded { .. } => {
                counter!(
                    "sync_jobs_completed_total",
                    "kind" => kind.as_str(),
                    "status" => "succeeded"
                )
                .increment(1);
            }
            JobResult::Failed { .. } => {
                counter!("sync_jobs_completed_total", "kind" => kind.as_str(), "status" => "failed")
                    .increment(1);
            }
            JobResult::Skipped => {
                warn!(job_id = %job_id, "Job reached a terminal state elsewhere; result discarded");
            }
        }

        Ok(result)
    }

    /// Ok(items) on success, Err(diagnostic) on any failure.
    async fn run_connector(
        &self,
        job_id: Uuid,
        kind: JobKind,
    ) -> Result<Result<i64, String>, StoreError> {
        let Some(job) = self.jobs.find(job_id).await? else {
            return Ok(Err("job record disappeared".to_string()));
        };
        let Some(project) = self
            .projects
            .find(job.project_id)
            .await
            .map_err(StoreError::from)?
        else {
            return Ok(Err("project no longer exists".to_string()));
        };
        let Some(connector) = self.registry.get(kind) else {
            return Ok(Err(format!("{} integration is not configured", kind.display_name())));
        };

        let progress = JobProgress::new(job_id, self.jobs.clone());
        let params = SyncParams {
            job_id,
            project,
            progress: progress.clone(),
        };

        // A separate task so a panicking connector still yields a terminal state
        let mut handle =
            tokio::spawn(async move { connector.sync(params).await }.in_current_span());

        let joined = match tokio::time::timeout(self.max_run, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Ok(Err(format!(
                    "timed out after {}s",
                    self.max_run.as_secs()
                )));
            }
        };

        Ok(match joined {
            Ok(Ok(outcome)) => Ok(outcome.items_synced.max(progress.current())),
            Ok(Err(sync_error)) => Err(self.classify_failure(kind, sync_error)),
            Err(join_error) if join_error.is_panic() => Err("sync task panicked".to_string()),
            Err(_) => Err("sync task was cancelled".to_string()),
        })
    }

    fn classify_failure(&self, kind: JobKind, sync_error: SyncError) -> String {
        if let Some(retry_hint) = sync_error.unavailability() {
            self.availability.mark_unavailable(kind, retry_hint);
        }
        sync_error.to_string()
    }
}

impl JobLauncher for Worker {
    fn launch(&self, job: SyncJob) {
        // Completion is tracked through the job record, not the handle
        drop(self.spawn(job));
    }
}
