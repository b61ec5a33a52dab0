//! # Job Reconciler
//!
//! Background sweep that fails jobs the worker can no longer finish: `running`
//! jobs older than the running timeout (crashed or hung workers) and `queued`
//! jobs that never started (lost launches). Each failure goes through the same
//! compare-and-set transition as the worker, so a job finishing concurrently
//! keeps its own result.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use metrics::{counter, histogram};
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::repositories::{StoreError, SyncJobRepository};

/// Jobs failed by one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: Vec<Uuid>,
    pub never_started: Vec<Uuid>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.timed_out.len() + self.never_started.len()
    }
}

pub struct Reconciler {
    jobs: SyncJobRepository,
    running_timeout: Duration,
    queued_timeout: Duration,
    tick: Duration,
}

impl Reconciler {
    pub fn new(jobs: SyncJobRepository, config: &ReconcilerConfig) -> Self {
        Self {
            jobs,
            running_timeout: Duration::from_secs(config.running_timeout_seconds),
            queued_timeout: Duration::from_secs(config.queued_timeout_seconds),
            tick: Duration::from_secs(config.tick_interval_seconds),
        }
    }

    /// Run the sweep loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.tick.as_secs(),
            running_timeout_seconds = self.running_timeout.as_secs(),
            queued_timeout_seconds = self.queued_timeout.as_secs(),
            "Starting job reconciler"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job reconciler shutdown requested");
                    break;
                }
                _ = sleep(self.tick) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "Reconciler sweep failed");
                    }
                    histogram!("sync_reconciler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Job reconciler stopped");
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        self.sweep_at(Utc::now().fixed_offset()).await
    }

    /// Sweep using `now` as the reference time.
    pub async fn sweep_at(&self, now: DateTime<FixedOffset>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        let running_cutoff = cutoff(now, self.running_timeout);
        let running_reason = format!(
            "timed out after {}s without completing",
            self.running_timeout.as_secs()
        );
        for job in self.jobs.running_started_before(running_cutoff).await? {
            if self.jobs.mark_failed(job.id, &running_reason).await? {
                warn!(
                    job_id = %job.id,
                    project_id = %job.project_id,
                    job_kind = %job.job_type,
                    started_at = ?job.started_at,
                    "Failed stale running job"
                );
                counter!("sync_jobs_reconciled_total", "kind" => job.job_type.as_str())
                    .increment(1);
                report.timed_out.push(job.id);
            }
        }

        let queued_cutoff = cutoff(now, self.queued_timeout);
        let queued_reason = format!("never started within {}s", self.queued_timeout.as_secs());
        for job in self.jobs.queued_created_before(queued_cutoff).await? {
            if self.jobs.mark_failed(job.id, &queued_reason).await? {
                warn!(
                    job_id = %job.id,
                    project_id = %job.project_id,
                    job_kind = %job.job_type,
                    created_at = %job.created_at,
                    "Failed job that never started"
                );
                counter!("sync_jobs_reconciled_total", "kind" => job.job_type.as_str())
                    .increment(1);
                report.never_started.push(job.id);
            }
        }

        debug!(
            timed_out = report.timed_out.len(),
            never_started = report.never_started.len(),
            "Reconciler sweep completed"
        );
        Ok(report)
    }
}

fn cutoff(now: DateTime<FixedOffset>, age: Duration) -> DateTime<FixedOffset> {
    ChronoDuration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC.fixed_offset())
}
