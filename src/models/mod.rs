//! # Data Models
//!
//! SeaORM entities and the small shared types used across the service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod project;
pub mod sync_job;

pub use project::Entity as Project;
pub use sync_job::Entity as SyncJob;
pub use sync_job::{JobKind, JobStatus, JobSummary};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "project-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
