//! Connectors module
//!
//! - The `SyncConnector` trait a worker drives for one job
//! - A registry mapping each job kind to its connector
//! - Jira (issue tracker) and Precursive (resourcing) implementations

pub mod jira;
pub mod precursive;
pub mod registry;
pub mod trait_;

pub use jira::JiraConnector;
pub use precursive::PrecursiveConnector;
pub use registry::Registry;
pub use trait_::{
    ConnectorError, JobProgress, SyncConnector, SyncError, SyncErrorKind, SyncOutcome,
    SyncParams,
};
