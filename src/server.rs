//! # Server
//!
//! Wires the sync components together, builds the router, and runs the HTTP
//! listener alongside the job reconciler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::availability::AvailabilityTracker;
use crate::config::AppConfig;
use crate::connectors::Registry;
use crate::dispatcher::{Dispatcher, JobLauncher};
use crate::handlers;
use crate::reconciler::Reconciler;
use crate::repositories::{ProjectRepository, SyncJobRepository};
use crate::status::StatusService;
use crate::telemetry;
use crate::worker::Worker;

const RECONCILER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub dispatcher: Dispatcher,
    pub status: StatusService,
}

impl AppState {
    /// State whose accepted jobs go to `launcher`.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: Arc<Registry>,
        availability: Arc<AvailabilityTracker>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        let projects = ProjectRepository::new(db.clone());
        let jobs = SyncJobRepository::new(db.clone());
        Self {
            dispatcher: Dispatcher::new(
                projects.clone(),
                jobs.clone(),
                Arc::clone(&registry),
                availability,
                launcher,
            ),
            status: StatusService::new(projects, jobs, registry),
            config,
            db,
        }
    }

    /// State backed by an in-process [`Worker`].
    pub fn with_worker(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: Arc<Registry>,
    ) -> (Self, Worker) {
        let availability = Arc::new(AvailabilityTracker::new(config.availability.clone()));
        let worker = Worker::new(
            SyncJobRepository::new(db.clone()),
            ProjectRepository::new(db.clone()),
            Arc::clone(&registry),
            Arc::clone(&availability),
            &config.worker,
        );
        let launcher: Arc<dyn JobLauncher> = Arc::new(worker.clone());
        let state = Self::new(config, db, registry, availability, launcher);
        (state, worker)
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/sync/jobs/{job_id}", get(handlers::sync::get_job))
        .route("/sync/{project_id}", post(handlers::sync::trigger_full))
        .route(
            "/sync/{project_id}/issue-tracker",
            post(handlers::sync::trigger_issue_tracker),
        )
        .route(
            "/sync/{project_id}/resourcing",
            post(handlers::sync::trigger_resourcing),
        )
        .route("/sync/{project_id}/status", get(handlers::sync::get_status))
        .route("/sync/{project_id}/jobs", get(handlers::sync::list_jobs))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(telemetry::trace_context_middleware))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Runs the service until SIGINT/SIGTERM.
///
/// Stale jobs left behind by a previous process are reconciled before the
/// listener opens.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let registry = Arc::new(
        Registry::from_config(&config).context("Failed to build integration connectors")?,
    );
    for kind in crate::models::JobKind::ALL {
        if !registry.contains(kind) {
            warn!(job_kind = %kind, "Integration not configured; triggers will be rejected");
        }
    }

    let jobs = SyncJobRepository::new(db.clone());
    let reconciler = Reconciler::new(jobs, &config.reconciler);
    let report = reconciler
        .sweep()
        .await
        .context("Startup reconciliation failed")?;
    info!(
        timed_out = report.timed_out.len(),
        never_started = report.never_started.len(),
        "Startup reconciliation complete"
    );

    let (state, _worker) = AppState::with_worker(Arc::clone(&config), db, registry);
    let app = create_app(state);

    let shutdown = CancellationToken::new();
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown.clone()));

    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, profile = %config.profile, "Server listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    shutdown.cancel();
    if tokio::time::timeout(RECONCILER_SHUTDOWN_GRACE, reconciler_handle)
        .await
        .is_err()
    {
        warn!("Job reconciler did not stop within the shutdown grace period");
    }
    info!("Server stopped");

    serve_result.context("Server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::sync::trigger_issue_tracker,
        crate::handlers::sync::trigger_resourcing,
        crate::handlers::sync::trigger_full,
        crate::handlers::sync::get_status,
        crate::handlers::sync::list_jobs,
        crate::handlers::sync::get_job,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::sync::TriggerResponse,
            crate::handlers::sync::FullSyncEntry,
            crate::handlers::sync::FullSyncResponse,
            crate::status::ProjectSyncSummary,
            crate::status::KindStatus,
            crate::models::JobSummary,
            crate::models::JobKind,
            crate::models::JobStatus,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "health", description = "Liveness and readiness probes"),
        (name = "sync", description = "Sync job triggers and status")
    ),
    info(
        title = "Project Sync API",
        description = "Triggers and tracks issue tracker and resourcing syncs per project",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
