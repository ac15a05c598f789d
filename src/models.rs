//! Core data models for gitingest
//!
//! These models are used throughout the codebase for representing
//! contributors, enriched commit payloads, published events, and the
//! persisted sync state.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Contributor roles recognised on a commit.
///
/// `Author` and `Committer` come from the commit headers; the remaining
/// roles are derived from commit-message trailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Author,
    Committer,
    CoAuthor,
    Signer,
    Tester,
    Approver,
    Reviewer,
    Reporter,
    Informer,
    Resolver,
    Influencer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Author => "author",
            Role::Committer => "committer",
            Role::CoAuthor => "co_author",
            Role::Signer => "signer",
            Role::Tester => "tester",
            Role::Approver => "approver",
            Role::Reviewer => "reviewer",
            Role::Reporter => "reporter",
            Role::Informer => "informer",
            Role::Resolver => "resolver",
            Role::Influencer => "influencer",
        };
        write!(f, "{}", s)
    }
}

/// A normalized contributor identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub source: String,
    pub name: String,
    pub email: String,
    pub username: String,
    pub is_verified: bool,
}

/// One contributor entry on a commit: identity, role, and weight.
///
/// Authors share a weight of `1/N`; every other role carries `1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub identity: Identity,
    pub role: Role,
    pub weight: f64,
}

/// Per-extension file change summary on an enriched commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFilesByType {
    #[serde(rename = "type")]
    pub file_type: String,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub files_created: i64,
    pub files_modified: i64,
    pub files_deleted: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_lines_of_code: Option<i64>,
}

/// Programming language summary entry as reported by the LOC tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pls {
    pub language: String,
    pub files: i64,
    pub blank: i64,
    pub comment: i64,
    pub code: i64,
}

/// The enriched commit payload published downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPayload {
    pub id: String,
    pub sha: String,
    pub short_hash: String,
    pub url: String,
    pub repository_id: String,
    pub repository_url: String,
    pub branch: String,
    pub default_branch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub parent_shas: Vec<String>,
    pub authored_timestamp: DateTime<FixedOffset>,
    pub authored_local_timestamp: String,
    pub committed_timestamp: DateTime<FixedOffset>,
    pub committed_local_timestamp: String,
    pub doc_commit: bool,
    pub merge_commit: bool,
    pub orphaned: bool,
    #[serde(default)]
    pub commit_tags: Vec<String>,
    #[serde(default)]
    pub time_to_commit_hours: f64,
    #[serde(default)]
    pub repo_short_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_id: Option<String>,
    /// First sighting of this sha within the run.
    #[serde(default)]
    pub is_parent_commit: bool,
    pub contributors: Vec<Contributor>,
    pub files: Vec<CommitFilesByType>,
    pub total_lines_of_code: i64,
    pub program_language_summary: Vec<Pls>,
    pub sync_timestamp: DateTime<Utc>,
}

impl CommitPayload {
    /// UTC instant of the authored timestamp, used as the sync watermark.
    pub fn authored_utc(&self) -> DateTime<Utc> {
        self.authored_timestamp.with_timezone(&Utc)
    }
}

/// Action carried on a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Created,
    Updated,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Created => "commit.created",
            EventAction::Updated => "commit.updated",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope wrapping every published payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub connector: String,
    pub connector_version: String,
    pub source: String,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub payload: CommitPayload,
}

/// Persisted sync watermark for an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastSync {
    pub last_sync: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub target: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub head: String,
    #[serde(rename = "first_commit_At", default = "epoch")]
    pub first_commit_at: DateTime<Utc>,
}

impl Default for LastSync {
    fn default() -> Self {
        Self {
            last_sync: epoch(),
            target: 0,
            total: 0,
            head: String::new(),
            first_commit_at: epoch(),
        }
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Role::CoAuthor).unwrap(),
            "\"co_author\""
        );
        assert_eq!(Role::Signer.to_string(), "signer");
    }

    #[test]
    fn event_action_names() {
        assert_eq!(EventAction::Created.as_str(), "commit.created");
        assert_eq!(EventAction::Updated.to_string(), "commit.updated");
    }

    #[test]
    fn last_sync_roundtrip_omits_empty_fields() {
        let ls = LastSync {
            last_sync: Utc::now(),
            ..Default::default()
        };
        let json = serde_json::to_string(&ls).unwrap();
        assert!(!json.contains("target"));
        assert!(!json.contains("head"));
        assert!(json.contains("first_commit_At"));

        let back: LastSync = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total, 0);
    }

    #[test]
    fn files_by_type_skips_absent_loc() {
        let bucket = CommitFilesByType {
            file_type: "rs".into(),
            lines_added: 3,
            ..Default::default()
        };
        let json = serde_json::to_string(&bucket).unwrap();
        assert!(!json.contains("actual_lines_of_code"));
        assert!(json.contains("\"type\":\"rs\""));
    }
}
