//! # SyncJob Repository
//!
//! The job record store. Owns every write to `sync_jobs` and enforces the
//! lifecycle `queued -> running -> {succeeded | failed}` with conditional
//! updates, so a terminal row is never modified again.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use thiserror::Error;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::sync_job::{ActiveModel, Column, Entity, JobKind, JobStatus, Model};

/// Attempts at insert-or-fetch before giving up on a flapping active slot.
const CREATE_ATTEMPTS: usize = 3;

/// Errors raised by the job record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("active job slot for project {project_id} ({kind}) kept changing during creation")]
    Contended { project_id: Uuid, kind: JobKind },
}

/// Result of asking the store for a fresh queued job.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new row was inserted in `queued`.
    Created(Model),
    /// Another non-terminal job already holds the (project, kind) slot.
    Existing(Model),
}

/// Repository for sync job database operations
#[derive(Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a `queued` job unless one is already active for `(project_id, kind)`.
    ///
    /// The partial unique index on `(project_id, job_type)` over active rows is the
    /// arbiter: when two callers race past the lookup, the loser's insert fails with
    /// a unique violation and it returns the winner's row instead.
    pub async fn create_queued(
        &self,
        project_id: Uuid,
        kind: JobKind,
        requested_by: Option<Uuid>,
    ) -> Result<CreateOutcome, StoreError> {
        for _ in 0..CREATE_ATTEMPTS {
            if let Some(existing) = self.find_active(project_id, kind).await? {
                return Ok(CreateOutcome::Existing(existing));
            }

            let now = Utc::now().fixed_offset();
            let job = ActiveModel {
                id: Set(Uuid::new_v4()),
                project_id: Set(project_id),
                job_type: Set(kind),
                status: Set(JobStatus::Queued),
                requested_by: Set(requested_by),
                items_synced: Set(0),
                error: Set(None),
                created_at: Set(now),
                started_at: Set(None),
                completed_at: Set(None),
                updated_at: Set(now),
            };

            match job.insert(&self.db).await {
                Ok(created) => return Ok(CreateOutcome::Created(created)),
                Err(err) if is_unique_violation(&err) => {
                    tracing::debug!(
                        project_id = %project_id,
                        job_kind = %kind,
                        "Lost race for active job slot"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::Contended { project_id, kind })
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, StoreError> {
        Ok(Entity::find_by_id(job_id).one(&self.db).await?)
    }

    /// The queued/running job for `(project_id, kind)`, if any.
    pub async fn find_active(
        &self,
        project_id: Uuid,
        kind: JobKind,
    ) -> Result<Option<Model>, StoreError> {
        let job = Entity::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::JobType.eq(kind))
            .filter(Column::Status.is_in(JobStatus::ACTIVE))
            .order_by_desc(Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(job)
    }

    /// Most recently completed job for `(project_id, kind)`, success or failure.
    pub async fn last_terminal(
        &self,
        project_id: Uuid,
        kind: JobKind,
    ) -> Result<Option<Model>, StoreError> {
        let job = Entity::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::JobType.eq(kind))
            .filter(Column::Status.is_in([JobStatus::Succeeded, JobStatus::Failed]))
            .order_by_desc(Column::CompletedAt)
            .order_by_desc(Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(job)
    }

    /// Latest `completed_at` among succeeded jobs of any kind for the project.
    pub async fn last_synced_at(
        &self,
        project_id: Uuid,
    ) -> Result<Option<DateTime<FixedOffset>>, StoreError> {
        let job = Entity::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::Status.eq(JobStatus::Succeeded))
            .filter(Column::CompletedAt.is_not_null())
            .order_by_desc(Column::CompletedAt)
            .one(&self.db)
            .await?;
        Ok(job.and_then(|job| job.completed_at))
    }

    /// Most recent jobs for a project, newest first.
    pub async fn list_for_project(
        &self,
        project_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Model>, StoreError> {
        let jobs = Entity::find()
            .filter(Column::ProjectId.eq(project_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(jobs)
    }

    /// `queued -> running`. Returns false if the job was not queued.
    pub async fn mark_running(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Running))
            .col_expr(Column::StartedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Queued))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Raise `items_synced` on a running job. Lower counts are ignored.
    pub async fn record_progress(
        &self,
        job_id: Uuid,
        items_synced: i64,
    ) -> Result<bool, StoreError> {
        let result = Entity::update_many()
            .col_expr(Column::ItemsSynced, Expr::value(items_synced))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Running))
            .filter(Column::ItemsSynced.lte(items_synced))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// `running -> succeeded`. Returns false if the job was not running.
    pub async fn mark_succeeded(
        &self,
        job_id: Uuid,
        items_synced: i64,
    ) -> Result<bool, StoreError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Succeeded))
            .col_expr(
                Column::ItemsSynced,
                Expr::case(Column::ItemsSynced.lt(items_synced), items_synced)
                    .finally(Expr::col(Column::ItemsSynced))
                    .into(),
            )
            .col_expr(Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(Column::Error, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Running))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// `{queued | running} -> failed`. A queued job also gets `started_at` so
    /// that every non-queued row carries one. Returns false if already terminal.
    pub async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Failed))
            .col_expr(Column::Error, Expr::value(Some(error.to_string())))
            .col_expr(
                Column::StartedAt,
                Expr::case(Column::StartedAt.is_null(), Some(now))
                    .finally(Expr::col(Column::StartedAt))
                    .into(),
            )
            .col_expr(Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_in(JobStatus::ACTIVE))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Jobs in `running` whose `started_at` is before `cutoff`.
    pub async fn running_started_before(
        &self,
        cutoff: DateTime<FixedOffset>,
    ) -> Result<Vec<Model>, StoreError> {
        let jobs = Entity::find()
            .filter(Column::Status.eq(JobStatus::Running))
            .filter(Column::StartedAt.lt(cutoff))
            .order_by_asc(Column::StartedAt)
            .all(&self.db)
            .await?;
        Ok(jobs)
    }

    /// Jobs still `queued` that were created before `cutoff`.
    pub async fn queued_created_before(
        &self,
        cutoff: DateTime<FixedOffset>,
    ) -> Result<Vec<Model>, StoreError> {
        let jobs = Entity::find()
            .filter(Column::Status.eq(JobStatus::Queued))
            .filter(Column::CreatedAt.lt(cutoff))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectionTrait, Database, DatabaseBackend, Statement};

    async fn setup() -> (SyncJobRepository, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "PRAGMA foreign_keys = ON",
        ))
        .await
        .unwrap();

        let project_id = Uuid::new_v4();
        project::ActiveModel {
            id: Set(project_id),
            name: Set("Apollo".to_string()),
            issue_tracker_url: Set(None),
            issue_tracker_key: Set(Some("APL".to_string())),
            resourcing_url: Set(None),
            resourcing_id: Set(Some("a0X000001".to_string())),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(&db)
        .await
        .unwrap();

        (SyncJobRepository::new(db), project_id)
    }

    fn created(outcome: CreateOutcome) -> Model {
        match outcome {
            CreateOutcome::Created(job) => job,
            CreateOutcome::Existing(job) => panic!("expected a new job, got existing {}", job.id),
        }
    }

    #[tokio::test]
    async fn second_create_returns_existing_active_job() {
        let (repo, project_id) = setup().await;

        let first = created(
            repo.create_queued(project_id, JobKind::IssueTracker, None)
                .await
                .unwrap(),
        );
        assert_eq!(first.status, JobStatus::Queued);
        assert!(first.started_at.is_none());

        match repo
            .create_queued(project_id, JobKind::IssueTracker, None)
            .await
            .unwrap()
        {
            CreateOutcome::Existing(job) => assert_eq!(job.id, first.id),
            CreateOutcome::Created(job) => panic!("duplicate active job {}", job.id),
        }

        // A different kind has its own slot
        let other = created(
            repo.create_queued(project_id, JobKind::Resourcing, None)
                .await
                .unwrap(),
        );
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn unique_index_rejects_second_active_row() {
        let (repo, project_id) = setup().await;
        created(
            repo.create_queued(project_id, JobKind::Resourcing, None)
                .await
                .unwrap(),
        );

        let now = Utc::now().fixed_offset();
        let duplicate = ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            job_type: Set(JobKind::Resourcing),
            status: Set(JobStatus::Running),
            requested_by: Set(None),
            items_synced: Set(0),
            error: Set(None),
            created_at: Set(now),
            started_at: Set(Some(now)),
            completed_at: Set(None),
            updated_at: Set(now),
        }
        .insert(&repo.db)
        .await
        .unwrap_err();

        assert!(is_unique_violation(&duplicate));
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_one_way() {
        let (repo, project_id) = setup().await;
        let job = created(
            repo.create_queued(project_id, JobKind::IssueTracker, None)
                .await
                .unwrap(),
        );

        // Cannot succeed before running
        assert!(!repo.mark_succeeded(job.id, 1).await.unwrap());

        assert!(repo.mark_running(job.id).await.unwrap());
        assert!(!repo.mark_running(job.id).await.unwrap());

        assert!(repo.record_progress(job.id, 10).await.unwrap());
        assert!(!repo.record_progress(job.id, 5).await.unwrap());

        assert!(repo.mark_succeeded(job.id, 42).await.unwrap());
        assert!(!repo.mark_failed(job.id, "late failure").await.unwrap());
        assert!(!repo.mark_succeeded(job.id, 50).await.unwrap());

        let stored = repo.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.items_synced, 42);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn success_never_lowers_items_synced() {
        let (repo, project_id) = setup().await;
        let job = created(
            repo.create_queued(project_id, JobKind::IssueTracker, None)
                .await
                .unwrap(),
        );
        repo.mark_running(job.id).await.unwrap();
        repo.record_progress(job.id, 30).await.unwrap();
        repo.mark_succeeded(job.id, 12).await.unwrap();

        let stored = repo.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.items_synced, 30);
    }

    #[tokio::test]
    async fn failing_a_queued_job_sets_both_timestamps() {
        let (repo, project_id) = setup().await;
        let job = created(
            repo.create_queued(project_id, JobKind::Resourcing, None)
                .await
                .unwrap(),
        );

        assert!(repo.mark_failed(job.id, "never started").await.unwrap());
        let stored = repo.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("never started"));
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());

        // The slot is free again
        let next = created(
            repo.create_queued(project_id, JobKind::Resourcing, None)
                .await
                .unwrap(),
        );
        assert_ne!(next.id, job.id);
    }

    #[tokio::test]
    async fn last_terminal_and_last_synced_at() {
        let (repo, project_id) = setup().await;
        assert!(repo.last_synced_at(project_id).await.unwrap().is_none());

        let ok = created(
            repo.create_queued(project_id, JobKind::IssueTracker, None)
                .await
                .unwrap(),
        );
        repo.mark_running(ok.id).await.unwrap();
        repo.mark_succeeded(ok.id, 3).await.unwrap();

        let failed = created(
            repo.create_queued(project_id, JobKind::Resourcing, None)
                .await
                .unwrap(),
        );
        repo.mark_running(failed.id).await.unwrap();
        repo.mark_failed(failed.id, "rate limited").await.unwrap();

        let ok = repo.find(ok.id).await.unwrap().unwrap();
        assert_eq!(
            repo.last_synced_at(project_id).await.unwrap(),
            ok.completed_at
        );
        assert_eq!(
            repo.last_terminal(project_id, JobKind::Resourcing)
                .await
                .unwrap()
                .map(|j| j.id),
            Some(failed.id)
        );
        assert_eq!(repo.list_for_project(project_id, 10).await.unwrap().len(), 2);
        assert_eq!(repo.list_for_project(project_id, 1).await.unwrap().len(), 1);
    }
}
