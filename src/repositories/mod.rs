//! # Repository Layer
//!
//! SeaORM-backed data access for projects and sync jobs.

pub mod project;
pub mod sync_job;

pub use project::ProjectRepository;
pub use sync_job::{CreateOutcome, StoreError, SyncJobRepository};
