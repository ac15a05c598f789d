//! Payload fingerprinting for deduplication
//!
//! The content hash intentionally covers only the identity-bearing fields
//! (`id`, `sha`, repository URL and id, message) so a resync of unchanged
//! history fingerprints identically and is skipped.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::CommitPayload;

#[derive(Serialize)]
struct HashFields<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "SHA")]
    sha: &'a str,
    #[serde(rename = "RepositoryURL")]
    repository_url: &'a str,
    #[serde(rename = "RepositoryID")]
    repository_id: &'a str,
    #[serde(rename = "Message")]
    message: &'a str,
}

/// Hex SHA-256 over the canonical JSON of the elected payload fields.
pub fn content_hash(payload: &CommitPayload) -> Result<String> {
    let fields = HashFields {
        id: &payload.id,
        sha: &payload.sha,
        repository_url: &payload.repository_url,
        repository_id: &payload.repository_id,
        message: payload.message.as_deref().unwrap_or(""),
    };
    let bytes = serde_json::to_vec(&fields)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn payload(message: &str) -> CommitPayload {
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        CommitPayload {
            id: "id-1".into(),
            sha: "aaaa".into(),
            short_hash: "aaaa".into(),
            url: "https://example.org/aaaa".into(),
            repository_id: "repo-1".into(),
            repository_url: "https://example.org/repo".into(),
            branch: "main".into(),
            default_branch: true,
            message: Some(message.to_string()),
            parent_shas: vec![],
            authored_timestamp: ts.into(),
            authored_local_timestamp: ts.to_rfc3339(),
            committed_timestamp: ts.into(),
            committed_local_timestamp: ts.to_rfc3339(),
            doc_commit: false,
            merge_commit: false,
            orphaned: false,
            commit_tags: vec![],
            time_to_commit_hours: 0.0,
            repo_short_name: "repo".into(),
            github_repo: None,
            url_id: None,
            is_parent_commit: false,
            contributors: vec![],
            files: vec![],
            total_lines_of_code: 0,
            program_language_summary: vec![],
            sync_timestamp: ts,
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let a = content_hash(&payload("m")).unwrap();
        let b = content_hash(&payload("m")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_covers_message() {
        assert_ne!(
            content_hash(&payload("m1")).unwrap(),
            content_hash(&payload("m2")).unwrap()
        );
    }

    #[test]
    fn hash_ignores_non_elected_fields() {
        let mut a = payload("m");
        let mut b = payload("m");
        a.branch = "main".into();
        b.branch = "dev".into();
        b.doc_commit = true;
        b.is_parent_commit = true;
        b.time_to_commit_hours = 5.5;
        b.sync_timestamp = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }
}
