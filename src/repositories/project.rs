//! # Project Repository
//!
//! Read-only lookups over the dashboard-owned projects table.

use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use uuid::Uuid;

use crate::models::project::{Entity as Project, Model as ProjectModel};

/// Repository for project lookups
#[derive(Clone)]
pub struct ProjectRepository {
    db: DatabaseConnection,
}

impl ProjectRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Find a project by id
    pub async fn find(&self, project_id: Uuid) -> Result<Option<ProjectModel>, DbErr> {
        Project::find_by_id(project_id).one(&self.db).await
    }
}
