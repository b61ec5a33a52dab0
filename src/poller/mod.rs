//! # Client Poller
//!
//! Observer-side loop for one project: fetches the sync summary, keeps
//! polling at a short interval while any job is active, stops once every job
//! has settled, and emits exactly one completion event per finished job.
//!
//! Observers for different projects share nothing but the optional view
//! cache. A detached observer schedules no further fetches; a fetch already in
//! flight is allowed to finish but its result is dropped.

pub mod cache;
pub mod client;
pub mod state;

pub use cache::{CacheKey, ViewCache};
pub use client::{HttpSyncClient, PollError, StatusSource};
pub use state::{CompletionEvent, Observation, Phase, PollerConfig, PollerState};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handlers::sync::TriggerResponse;
use crate::models::sync_job::JobKind;
use crate::status::ProjectSyncSummary;

/// Cache shared by the observers of one client.
pub type SharedViewCache = Arc<Mutex<ViewCache<ProjectSyncSummary>>>;

/// Events delivered to the observer's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PollerEvent {
    /// A fresh summary was applied
    Summary(ProjectSyncSummary),
    /// A job reached a terminal state (emitted once per job)
    Completed(CompletionEvent),
    /// Cached views that must be refreshed
    Invalidated(Vec<CacheKey>),
    /// The fetch failed; it is retried on the next tick when polling
    FetchFailed(String),
}

struct Shared {
    project_id: Uuid,
    source: Arc<dyn StatusSource>,
    state: Mutex<PollerState>,
    cache: SharedViewCache,
    generation: AtomicU64,
    wake: Notify,
    detached: CancellationToken,
    events: mpsc::UnboundedSender<PollerEvent>,
}

impl Shared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PollerEvent) {
        if self.events.send(event).is_err() {
            debug!(project_id = %self.project_id, "Poller event receiver dropped");
        }
    }

    /// Apply a fetch result and return the delay before the next fetch.
    fn apply(&self, fetched: Result<ProjectSyncSummary, PollError>) -> Option<Duration> {
        match fetched {
            Ok(summary) => {
                let observation = self.lock_state().observe(summary.clone());

                {
                    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
                    cache.invalidate(&observation.invalidations);
                    cache.put(CacheKey::Summary(self.project_id), summary.clone());
                }

                self.emit(PollerEvent::Summary(summary));
                for event in observation.events {
                    self.emit(PollerEvent::Completed(event));
                }
                if !observation.invalidations.is_empty() {
                    self.emit(PollerEvent::Invalidated(observation.invalidations));
                }
                observation.next_delay
            }
            Err(err) => {
                warn!(project_id = %self.project_id, error = %err, "Sync status fetch failed");
                self.emit(PollerEvent::FetchFailed(err.to_string()));
                self.lock_state().on_fetch_error()
            }
        }
    }

    fn restart(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// Polling observer for one project
pub struct SyncObserver {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl SyncObserver {
    /// Subscribe to `project_id`; the first fetch happens immediately.
    pub fn spawn(
        project_id: Uuid,
        source: Arc<dyn StatusSource>,
        config: PollerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PollerEvent>) {
        Self::spawn_with_cache(project_id, source, config, SharedViewCache::default())
    }

    pub fn spawn_with_cache(
        project_id: Uuid,
        source: Arc<dyn StatusSource>,
        config: PollerConfig,
        cache: SharedViewCache,
    ) -> (Self, mpsc::UnboundedReceiver<PollerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            project_id,
            source,
            state: Mutex::new(PollerState::new(project_id, config)),
            cache,
            generation: AtomicU64::new(0),
            wake: Notify::new(),
            detached: CancellationToken::new(),
            events,
        });
        let task = tokio::spawn(run_loop(Arc::clone(&shared)));
        (Self { shared, task }, receiver)
    }

    pub fn project_id(&self) -> Uuid {
        self.shared.project_id
    }

    /// Fetch again now, whatever the current phase. A fetch in flight is
    /// superseded and its result dropped.
    pub fn restart(&self) {
        self.shared.restart();
    }

    /// Trigger a sync of `kind` and resume polling when a job is active.
    pub async fn trigger(&self, kind: JobKind) -> Result<TriggerResponse, PollError> {
        let response = self
            .shared
            .source
            .trigger(self.shared.project_id, kind)
            .await?;
        if response.accepted || response.deduplicated {
            self.shared.lock_state().mark_triggered(kind);
            self.shared.restart();
        }
        Ok(response)
    }

    pub fn phase(&self, kind: JobKind) -> Phase {
        self.shared.lock_state().phase(kind)
    }

    pub fn last_summary(&self) -> Option<ProjectSyncSummary> {
        self.shared.lock_state().last_summary().cloned()
    }

    pub fn is_detached(&self) -> bool {
        self.shared.detached.is_cancelled()
    }

    /// Stop observing. No further fetches are scheduled.
    pub fn detach(&self) {
        self.shared.detached.cancel();
    }

    /// Detach and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.detach();
        if let Err(err) = (&mut self.task).await {
            warn!(error = %err, "Poller task ended abnormally");
        }
    }
}

impl Drop for SyncObserver {
    fn drop(&mut self) {
        self.shared.detached.cancel();
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let mut next_delay = Some(Duration::ZERO);

    loop {
        match next_delay {
            Some(delay) => {
                tokio::select! {
                    biased;
                    _ = shared.detached.cancelled() => break,
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = shared.detached.cancelled() => break,
                    _ = shared.wake.notified() => {}
                }
            }
        }

        let generation = shared.generation.load(Ordering::SeqCst);
        let fetched = shared.source.fetch_summary(shared.project_id).await;

        if shared.detached.is_cancelled() {
            debug!(project_id = %shared.project_id, "Dropping fetch result for detached observer");
            break;
        }
        if generation != shared.generation.load(Ordering::SeqCst) {
            debug!(project_id = %shared.project_id, "Dropping superseded fetch result");
            next_delay = Some(Duration::ZERO);
            continue;
        }

        next_delay = shared.apply(fetched);
    }
}
