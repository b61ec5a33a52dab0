//! Connector registry
//!
//! Maps each [`JobKind`] to the connector that executes it. Only integrations
//! with complete configuration get a connector.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::connectors::{ConnectorError, JiraConnector, PrecursiveConnector, SyncConnector};
use crate::models::sync_job::JobKind;

/// Registry of sync connectors keyed by job kind
#[derive(Clone, Default)]
pub struct Registry {
    connectors: HashMap<JobKind, Arc<dyn SyncConnector>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configured integrations.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConnectorError> {
        let mut registry = Self::new();

        match JiraConnector::from_config(&config.issue_tracker)? {
            Some(jira) => registry.register(Arc::new(jira)),
            None => warn!("Issue tracker connector not registered: missing Jira credentials"),
        }

        match PrecursiveConnector::from_config(&config.resourcing)? {
            Some(precursive) => registry.register(Arc::new(precursive)),
            None => warn!("Resourcing connector not registered: missing Precursive settings"),
        }

        Ok(registry)
    }

    /// Register a connector under the kind it reports. Replaces any previous one.
    pub fn register(&mut self, connector: Arc<dyn SyncConnector>) {
        self.connectors.insert(connector.kind(), connector);
    }

    /// Get the connector for a kind
    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn SyncConnector>> {
        self.connectors.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.connectors.contains_key(&kind)
    }
}
