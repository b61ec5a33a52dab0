//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table. Each
//! row is one sync attempt of one integration for one project.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// External integration a job synchronizes from
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Issue tracker sync (Jira)
    #[sea_orm(string_value = "issue_tracker")]
    IssueTracker,
    /// Resourcing / financial system sync (Precursive)
    #[sea_orm(string_value = "resourcing")]
    Resourcing,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::IssueTracker, JobKind::Resourcing];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::IssueTracker => "issue_tracker",
            JobKind::Resourcing => "resourcing",
        }
    }

    /// Name shown to people in messages.
    pub fn display_name(self) -> &'static str {
        match self {
            JobKind::IssueTracker => "Issue tracker",
            JobKind::Resourcing => "Resourcing",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job: `queued -> running -> {succeeded | failed}`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl JobStatus {
    /// Non-terminal states; at most one job per (project, kind) may be in one.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Queued, JobStatus::Running];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SyncJob entity
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Project the job belongs to
    pub project_id: Uuid,

    /// Integration being synchronized
    pub job_type: JobKind,

    pub status: JobStatus,

    /// Authenticated actor that requested the sync, if known
    pub requested_by: Option<Uuid>,

    /// Number of records pulled so far; never decreases
    pub items_synced: i64,

    /// Short diagnostic, present only when `status == failed`
    pub error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    /// Set on transition to `running`
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Set on transition to a terminal state
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Job shape exposed at the HTTP boundary and consumed by pollers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobSummary {
    pub id: Uuid,
    pub job_type: JobKind,
    pub status: JobStatus,
    #[schema(value_type = String, format = DateTime, example = "2025-01-01T12:00:00Z")]
    pub created_at: DateTimeWithTimeZone,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<DateTimeWithTimeZone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub items_synced: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Model> for JobSummary {
    fn from(job: Model) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            items_synced: job.items_synced,
            error: job.error,
        }
    }
}
