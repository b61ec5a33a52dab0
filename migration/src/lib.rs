//! Database migrations for the project sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_090000_create_projects;
mod m2025_01_10_090100_create_sync_jobs;
mod m2025_01_10_090200_add_sync_job_active_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_090000_create_projects::Migration),
            Box::new(m2025_01_10_090100_create_sync_jobs::Migration),
            Box::new(m2025_01_10_090200_add_sync_job_active_guard::Migration),
        ]
    }
}
