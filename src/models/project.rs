//! Project entity model
//!
//! Read model over the dashboard's projects table. This service never writes
//! projects; it only needs to know whether a project exists and which external
//! identifiers link it to each integration.

use regex::Regex;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use std::sync::LazyLock;

use super::sync_job::JobKind;

static ISSUE_KEY_FROM_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:projects|browse)/([A-Z][A-Z0-9]+)").expect("valid regex")
});

/// Project row as stored by the dashboard
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// Browser URL of the project board in the issue tracker
    pub issue_tracker_url: Option<String>,

    /// Explicit issue tracker project key (e.g. `OPS`)
    pub issue_tracker_key: Option<String>,

    /// Browser URL of the project in the resourcing system
    pub resourcing_url: Option<String>,

    /// Resourcing system record id
    pub resourcing_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJobs,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Issue tracker key, falling back to the key embedded in the board URL.
    pub fn issue_tracker_key(&self) -> Option<String> {
        if let Some(key) = self
            .issue_tracker_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            return Some(key.to_string());
        }

        let url = self.issue_tracker_url.as_deref()?;
        ISSUE_KEY_FROM_URL
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn resourcing_id(&self) -> Option<String> {
        self.resourcing_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Whether the project carries the external identifier `kind` needs.
    pub fn is_linked(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::IssueTracker => self.issue_tracker_key().is_some(),
            JobKind::Resourcing => self.resourcing_id().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn project(url: Option<&str>, key: Option<&str>) -> Model {
        Model {
            id: Uuid::new_v4(),
            name: "Apollo".to_string(),
            issue_tracker_url: url.map(str::to_string),
            issue_tracker_key: key.map(str::to_string),
            resourcing_url: None,
            resourcing_id: None,
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn explicit_key_wins_over_url() {
        let p = project(
            Some("https://acme.atlassian.net/jira/software/projects/OPS/boards/1"),
            Some("APL"),
        );
        assert_eq!(p.issue_tracker_key().as_deref(), Some("APL"));
    }

    #[test]
    fn key_is_derived_from_board_url() {
        let p = project(
            Some("https://acme.atlassian.net/jira/software/projects/OPS2/boards/1"),
            None,
        );
        assert_eq!(p.issue_tracker_key().as_deref(), Some("OPS2"));

        let p = project(Some("https://acme.atlassian.net/browse/APL-12"), Some("  "));
        assert_eq!(p.issue_tracker_key().as_deref(), Some("APL"));
    }

    #[test]
    fn lowercase_or_missing_key_is_not_linked() {
        let p = project(Some("https://acme.atlassian.net/browse/apl-12"), None);
        assert!(!p.is_linked(JobKind::IssueTracker));

        let p = project(None, None);
        assert!(!p.is_linked(JobKind::IssueTracker));
        assert!(!p.is_linked(JobKind::Resourcing));
    }
}
