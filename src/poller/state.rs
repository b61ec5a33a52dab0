//! Pure polling state machine for one observed project.
//!
//! Each fetched summary goes through [`PollerState::observe`], which decides
//! which completion notifications to emit, which cached views are stale, and
//! whether (and when) to fetch again. No I/O happens here.

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use super::cache::CacheKey;
use crate::models::sync_job::{JobKind, JobStatus, JobSummary};
use crate::status::ProjectSyncSummary;

pub const DEFAULT_ACTIVE_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between fetches while any job is active
    pub active_interval: Duration,
    /// Record, without notifying, jobs that were already finished on the
    /// first fetch after subscribing
    pub suppress_initial_notifications: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            active_interval: DEFAULT_ACTIVE_INTERVAL,
            suppress_initial_notifications: false,
        }
    }
}

/// Polling phase of one job kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Polling,
}

/// One-shot notification that a job reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    Succeeded {
        kind: JobKind,
        job_id: Uuid,
        items_synced: i64,
    },
    Failed {
        kind: JobKind,
        job_id: Uuid,
        error: Option<String>,
    },
}

impl CompletionEvent {
    pub fn kind(&self) -> JobKind {
        match self {
            CompletionEvent::Succeeded { kind, .. } | CompletionEvent::Failed { kind, .. } => *kind,
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            CompletionEvent::Succeeded { job_id, .. } | CompletionEvent::Failed { job_id, .. } => {
                *job_id
            }
        }
    }

    fn from_job(job: &JobSummary) -> Option<Self> {
        match job.status {
            JobStatus::Succeeded => Some(CompletionEvent::Succeeded {
                kind: job.job_type,
                job_id: job.id,
                items_synced: job.items_synced,
            }),
            JobStatus::Failed => Some(CompletionEvent::Failed {
                kind: job.job_type,
                job_id: job.id,
                error: job.error.clone(),
            }),
            JobStatus::Queued | JobStatus::Running => None,
        }
    }
}

/// What the observer should do after a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub events: Vec<CompletionEvent>,
    pub invalidations: Vec<CacheKey>,
    /// `None` stops polling until something restarts observation
    pub next_delay: Option<Duration>,
}

#[derive(Debug)]
pub struct PollerState {
    project_id: Uuid,
    config: PollerConfig,
    phases: HashMap<JobKind, Phase>,
    last_notified: HashMap<JobKind, Uuid>,
    last_summary: Option<ProjectSyncSummary>,
}

impl PollerState {
    pub fn new(project_id: Uuid, config: PollerConfig) -> Self {
        Self {
            project_id,
            config,
            phases: HashMap::new(),
            last_notified: HashMap::new(),
            last_summary: None,
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn phase(&self, kind: JobKind) -> Phase {
        self.phases.get(&kind).copied().unwrap_or_default()
    }

    pub fn is_polling(&self) -> bool {
        JobKind::ALL
            .iter()
            .any(|kind| self.phase(*kind) == Phase::Polling)
    }

    /// Id of the last job a completion was emitted (or suppressed) for.
    pub fn last_notified(&self, kind: JobKind) -> Option<Uuid> {
        self.last_notified.get(&kind).copied()
    }

    pub fn last_summary(&self) -> Option<&ProjectSyncSummary> {
        self.last_summary.as_ref()
    }

    fn next_delay(&self) -> Option<Duration> {
        self.is_polling().then_some(self.config.active_interval)
    }

    /// Apply a freshly fetched summary.
    pub fn observe(&mut self, summary: ProjectSyncSummary) -> Observation {
        let first_fetch = self.last_summary.is_none();
        let mut observation = Observation::default();

        for kind in JobKind::ALL {
            let status = summary.kind(kind);

            let phase = if status.is_active() {
                Phase::Polling
            } else {
                Phase::Idle
            };
            self.phases.insert(kind, phase);

            let Some(last_job) = status.last_job.as_ref() else {
                continue;
            };
            if self.last_notified(kind) == Some(last_job.id) {
                continue;
            }
            let Some(event) = CompletionEvent::from_job(last_job) else {
                continue;
            };
            self.last_notified.insert(kind, last_job.id);

            if first_fetch && self.config.suppress_initial_notifications {
                continue;
            }

            match event {
                CompletionEvent::Succeeded { .. } => {
                    for key in CacheKey::dependents_of_success(self.project_id, kind) {
                        if !observation.invalidations.contains(&key) {
                            observation.invalidations.push(key);
                        }
                    }
                }
                CompletionEvent::Failed { .. } => {
                    let key = CacheKey::Summary(self.project_id);
                    if !observation.invalidations.contains(&key) {
                        observation.invalidations.push(key);
                    }
                }
            }
            observation.events.push(event);
        }

        self.last_summary = Some(summary);
        observation.next_delay = self.next_delay();
        observation
    }

    /// A trigger for `kind` was accepted or deduplicated onto an active job.
    pub fn mark_triggered(&mut self, kind: JobKind) -> Option<Duration> {
        self.phases.insert(kind, Phase::Polling);
        self.next_delay()
    }

    /// Delay before retrying after a failed fetch. Transport errors are
    /// retried while polling or before any summary has been seen.
    pub fn on_fetch_error(&self) -> Option<Duration> {
        if self.is_polling() || self.last_summary.is_none() {
            Some(self.config.active_interval)
        } else {
            None
        }
    }
}
