//! # Sync API Handlers
//!
//! Trigger endpoints per integration, the full-sync fan-out, and the read
//! endpoints backed by the status aggregator.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{Actor, ActorHeader, Viewer, ViewerHeader};
use crate::dispatcher::{DispatchError, TriggerOutcome};
use crate::error::{ApiError, not_found, validation_error};
use crate::models::sync_job::{JobKind, JobStatus, JobSummary};
use crate::server::AppState;
use crate::status::{ProjectSyncSummary, redact, redact_job};

pub const DEFAULT_JOBS_LIMIT: u64 = 10;
pub const MAX_JOBS_LIMIT: u64 = 50;

/// Result of a trigger request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriggerResponse {
    /// Job that was created, or the active job the request was deduplicated onto
    pub job_id: Uuid,
    pub status: JobStatus,
    #[schema(example = "Issue tracker sync queued")]
    pub message: String,
    /// A new job was created
    pub accepted: bool,
    /// A job was already active; nothing new was started
    pub deduplicated: bool,
}

impl From<TriggerOutcome> for TriggerResponse {
    fn from(outcome: TriggerOutcome) -> Self {
        Self {
            job_id: outcome.job_id,
            status: outcome.status,
            message: outcome.message,
            accepted: outcome.accepted,
            deduplicated: outcome.deduplicated,
        }
    }
}

/// Per-integration entry of a full sync
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FullSyncEntry {
    pub job_type: JobKind,
    pub accepted: bool,
    pub deduplicated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    pub message: String,
    /// `INTEGRATION_NOT_CONFIGURED` or `INTEGRATION_UNAVAILABLE` when the kind was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Result of a full sync request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FullSyncResponse {
    pub project_id: Uuid,
    pub results: Vec<FullSyncEntry>,
}

/// Query parameters for listing a project's jobs
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Maximum number of jobs to return (default 10, max 50)
    pub limit: Option<u64>,
}

fn trigger_status(accepted: bool) -> StatusCode {
    if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    }
}

async fn trigger_kind(
    state: AppState,
    path: Result<Path<Uuid>, PathRejection>,
    actor: Actor,
    kind: JobKind,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let Path(project_id) = path?;
    let outcome = state.dispatcher.trigger(project_id, kind, actor.0).await?;
    Ok((trigger_status(outcome.accepted), Json(outcome.into())))
}

/// Trigger an issue tracker sync for a project
#[utoipa::path(
    post,
    path = "/sync/{project_id}/issue-tracker",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier"),
        ActorHeader
    ),
    responses(
        (status = 202, description = "Sync job queued", body = TriggerResponse),
        (status = 200, description = "Sync already in progress", body = TriggerResponse),
        (status = 400, description = "Invalid project id or actor header", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError),
        (status = 503, description = "Integration not configured or temporarily unavailable", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_issue_tracker(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    actor: Actor,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    trigger_kind(state, path, actor, JobKind::IssueTracker).await
}

/// Trigger a resourcing system sync for a project
#[utoipa::path(
    post,
    path = "/sync/{project_id}/resourcing",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier"),
        ActorHeader
    ),
    responses(
        (status = 202, description = "Sync job queued", body = TriggerResponse),
        (status = 200, description = "Sync already in progress", body = TriggerResponse),
        (status = 400, description = "Invalid project id or actor header", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError),
        (status = 503, description = "Integration not configured or temporarily unavailable", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_resourcing(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    actor: Actor,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    trigger_kind(state, path, actor, JobKind::Resourcing).await
}

/// Trigger both integrations; each is deduplicated independently
#[utoipa::path(
    post,
    path = "/sync/{project_id}",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier"),
        ActorHeader
    ),
    responses(
        (status = 202, description = "At least one sync job queued", body = FullSyncResponse),
        (status = 200, description = "Nothing new was queued", body = FullSyncResponse),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_full(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    actor: Actor,
) -> Result<(StatusCode, Json<FullSyncResponse>), ApiError> {
    let Path(project_id) = path?;
    let outcome = state.dispatcher.trigger_full(project_id, actor.0).await?;

    let mut any_accepted = false;
    let mut results = Vec::with_capacity(outcome.per_kind.len());
    for (kind, result) in outcome.per_kind {
        let entry = match result {
            Ok(trigger) => {
                any_accepted |= trigger.accepted;
                FullSyncEntry {
                    job_type: kind,
                    accepted: trigger.accepted,
                    deduplicated: trigger.deduplicated,
                    job_id: Some(trigger.job_id),
                    status: Some(trigger.status),
                    message: trigger.message,
                    error_code: None,
                    retry_after: None,
                }
            }
            Err(err) => skipped_entry(kind, err),
        };
        results.push(entry);
    }

    Ok((
        trigger_status(any_accepted),
        Json(FullSyncResponse {
            project_id,
            results,
        }),
    ))
}

fn skipped_entry(kind: JobKind, err: DispatchError) -> FullSyncEntry {
    let message = err.to_string();
    let api_error = ApiError::from(err);
    FullSyncEntry {
        job_type: kind,
        accepted: false,
        deduplicated: false,
        job_id: None,
        status: None,
        message,
        error_code: Some(api_error.code.to_string()),
        retry_after: api_error.retry_after,
    }
}

/// Consolidated sync status of a project
#[utoipa::path(
    get,
    path = "/sync/{project_id}/status",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier"),
        ViewerHeader
    ),
    responses(
        (status = 200, description = "Project sync summary", body = ProjectSyncSummary),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn get_status(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    viewer: Viewer,
) -> Result<Json<ProjectSyncSummary>, ApiError> {
    let Path(project_id) = path?;
    let summary = state.status.get_summary(project_id).await?;
    Ok(Json(redact(summary, viewer.0)))
}

/// Most recent jobs of a project, newest first
#[utoipa::path(
    get,
    path = "/sync/{project_id}/jobs",
    params(
        ("project_id" = Uuid, Path, description = "Project identifier"),
        ListJobsQuery,
        ViewerHeader
    ),
    responses(
        (status = 200, description = "Recent jobs", body = [JobSummary]),
        (status = 400, description = "Invalid limit", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
    viewer: Viewer,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let Path(project_id) = path?;
    let Query(params) = query?;

    let limit = match params.limit {
        None => DEFAULT_JOBS_LIMIT,
        Some(0) => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": "Minimum allowed limit is 1" }),
            ));
        }
        Some(limit) if limit > MAX_JOBS_LIMIT => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({
                    "limit": format!("Maximum allowed limit is {}", MAX_JOBS_LIMIT)
                }),
            ));
        }
        Some(limit) => limit,
    };

    let jobs = state.status.list_jobs(project_id, limit).await?;
    Ok(Json(
        jobs.into_iter().map(|job| redact_job(job, viewer.0)).collect(),
    ))
}

/// Single job by id
#[utoipa::path(
    get,
    path = "/sync/jobs/{job_id}",
    params(
        ("job_id" = Uuid, Path, description = "Sync job identifier"),
        ViewerHeader
    ),
    responses(
        (status = 200, description = "Job summary", body = JobSummary),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn get_job(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    viewer: Viewer,
) -> Result<Json<JobSummary>, ApiError> {
    let Path(job_id) = path?;
    let job = state
        .status
        .get_job(job_id)
        .await?
        .ok_or_else(|| not_found(format!("Sync job {} not found", job_id)))?;
    Ok(Json(redact_job(job, viewer.0)))
}
