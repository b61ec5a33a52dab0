//! Shared fixtures for integration tests.
//!
//! In-memory SQLite databases with migrations applied, project fixtures,
//! scriptable connectors, and helpers to build and serve the router.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use project_sync::availability::AvailabilityTracker;
use project_sync::config::{AppConfig, AvailabilityConfig};
use project_sync::connectors::{Registry, SyncConnector, SyncError, SyncOutcome, SyncParams};
use project_sync::dispatcher::{Dispatcher, JobLauncher};
use project_sync::models::project;
use project_sync::models::sync_job::{JobKind, Model as SyncJob};
use project_sync::repositories::{ProjectRepository, SyncJobRepository};
use project_sync::server::{AppState, create_app};
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Set,
    Statement,
};
use tokio::sync::Notify;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;

    Ok(db)
}

/// External identifiers for a project fixture.
#[derive(Debug, Clone, Default)]
pub struct ProjectLinks {
    pub issue_tracker_url: Option<String>,
    pub issue_tracker_key: Option<String>,
    pub resourcing_id: Option<String>,
}

impl ProjectLinks {
    /// Linked to both integrations.
    pub fn linked() -> Self {
        Self {
            issue_tracker_url: Some("https://acme.atlassian.net/browse/OPS".to_string()),
            issue_tracker_key: Some("OPS".to_string()),
            resourcing_id: Some("a0B5g00000XyZ12AAB".to_string()),
        }
    }
}

pub async fn insert_project(db: &DatabaseConnection, links: ProjectLinks) -> Result<Uuid> {
    let id = Uuid::new_v4();
    project::ActiveModel {
        id: Set(id),
        name: Set(format!("Project {}", &id.simple().to_string()[..6])),
        issue_tracker_url: Set(links.issue_tracker_url),
        issue_tracker_key: Set(links.issue_tracker_key),
        resourcing_url: Set(None),
        resourcing_id: Set(links.resourcing_id),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

pub async fn insert_linked_project(db: &DatabaseConnection) -> Result<Uuid> {
    insert_project(db, ProjectLinks::linked()).await
}

/// Availability policy without jitter so cooldowns are predictable.
pub fn fixed_availability(default_cooldown_seconds: u64) -> AvailabilityConfig {
    AvailabilityConfig {
        default_cooldown_seconds,
        max_cooldown_seconds: 900,
        jitter_factor: 0.0,
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..AppConfig::default()
    };
    config.worker.max_run_seconds = 1;
    config.availability = fixed_availability(60);
    config
}

/// What a [`ScriptedConnector`] does when called.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report `progress` (if any), then succeed with `items`
    Succeed { progress: Option<i64>, items: i64 },
    Fail(SyncError),
    /// Never finish
    Hang,
    Panic,
}

/// Connector whose outcome is set by the test.
pub struct ScriptedConnector {
    kind: JobKind,
    script: Mutex<Script>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(kind: JobKind, script: Script) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(script),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Like [`new`](Self::new), but each call waits for `gate` before finishing.
    pub fn gated(kind: JobKind, script: Script, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(script),
            gate: Some(gate),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(kind: JobKind, items: i64) -> Arc<Self> {
        Self::new(
            kind,
            Script::Succeed {
                progress: None,
                items,
            },
        )
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncConnector for ScriptedConnector {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn sync(&self, params: SyncParams) -> Result<SyncOutcome, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();

        if let Script::Succeed {
            progress: Some(progress),
            ..
        } = &script
        {
            params.progress.report(*progress).await;
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match script {
            Script::Succeed { items, .. } => Ok(SyncOutcome {
                items_synced: items,
            }),
            Script::Fail(err) => Err(err),
            Script::Hang => std::future::pending().await,
            Script::Panic => panic!("connector exploded"),
        }
    }
}

pub fn as_connector(connector: Arc<ScriptedConnector>) -> Arc<dyn SyncConnector> {
    connector
}

pub fn registry_with(connectors: Vec<Arc<dyn SyncConnector>>) -> Arc<Registry> {
    let mut registry = Registry::new();
    for connector in connectors {
        registry.register(connector);
    }
    Arc::new(registry)
}

/// Registry with both kinds succeeding immediately.
pub fn full_registry() -> Arc<Registry> {
    registry_with(vec![
        as_connector(ScriptedConnector::succeeding(JobKind::IssueTracker, 10)),
        as_connector(ScriptedConnector::succeeding(JobKind::Resourcing, 1)),
    ])
}

/// Launcher that records accepted jobs without running them.
#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<SyncJob>>,
}

impl RecordingLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launched(&self) -> Vec<SyncJob> {
        self.launched.lock().unwrap().clone()
    }
}

impl JobLauncher for RecordingLauncher {
    fn launch(&self, job: SyncJob) {
        self.launched.lock().unwrap().push(job);
    }
}

/// Everything a dispatcher test needs.
pub struct DispatchFixture {
    pub db: DatabaseConnection,
    pub jobs: SyncJobRepository,
    pub availability: Arc<AvailabilityTracker>,
    pub launcher: Arc<RecordingLauncher>,
    pub dispatcher: Dispatcher,
}

pub async fn dispatch_fixture(registry: Arc<Registry>) -> Result<DispatchFixture> {
    let db = setup_test_db().await?;
    let jobs = SyncJobRepository::new(db.clone());
    let availability = Arc::new(AvailabilityTracker::new(fixed_availability(60)));
    let launcher = RecordingLauncher::new();
    let dispatcher = Dispatcher::new(
        ProjectRepository::new(db.clone()),
        jobs.clone(),
        registry,
        Arc::clone(&availability),
        launcher.clone(),
    );
    Ok(DispatchFixture {
        db,
        jobs,
        availability,
        launcher,
        dispatcher,
    })
}

/// App state whose jobs are recorded, not executed.
pub fn recording_state(
    db: DatabaseConnection,
    registry: Arc<Registry>,
) -> (AppState, Arc<RecordingLauncher>, Arc<AvailabilityTracker>) {
    let config = Arc::new(test_config());
    let availability = Arc::new(AvailabilityTracker::new(config.availability.clone()));
    let launcher = RecordingLauncher::new();
    let state = AppState::new(
        config,
        db,
        registry,
        Arc::clone(&availability),
        launcher.clone(),
    );
    (state, launcher, availability)
}

/// Serve the router on an ephemeral port and return its base URL.
pub async fn spawn_app(state: AppState) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, create_app(state)).await;
    });
    Ok(format!("http://{}", addr))
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
