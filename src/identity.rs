//! Deterministic identifiers
//!
//! Identity, repository, and commit ids are UUIDv5 values derived from their
//! defining fields, so re-running the connector always reproduces the same
//! ids.

use uuid::Uuid;

use crate::models::Identity;

/// Namespace under which all gitingest ids are derived.
const NAMESPACE: Uuid = Uuid::from_bytes([
    0x7a, 0x5c, 0x1e, 0x09, 0x64, 0x2b, 0x4d, 0x8f, 0x9d, 0x3a, 0x10, 0x5e, 0x2f, 0x7b, 0xc4,
    0x21,
]);

fn derive(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(":");
    Uuid::new_v5(&NAMESPACE, joined.as_bytes()).to_string()
}

/// Stable id for a contributor identity.
pub fn identity_id(source: &str, email: &str, name: &str, username: &str) -> String {
    derive(&[source, email, name, username])
}

/// Stable id for a repository, derived from its source id, URL, and type.
pub fn repository_id(source_id: &str, url: &str, source_type: &str) -> String {
    derive(&[source_id, url, source_type])
}

/// Stable id for a commit within a repository.
pub fn commit_id(repository_id: &str, sha: &str) -> String {
    derive(&[repository_id, sha])
}

/// Build a full [`Identity`] from its raw fields.
pub fn make_identity(source: &str, name: &str, email: &str, username: &str) -> Identity {
    Identity {
        id: identity_id(source, email, name, username),
        source: source.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        username: username.to_string(),
        is_verified: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        let a = identity_id("git", "a@x", "Alice", "");
        let b = identity_id("git", "a@x", "Alice", "");
        assert_eq!(a, b);
    }

    #[test]
    fn ids_are_case_insensitive_on_inputs() {
        let a = identity_id("git", "A@X", "Alice", "");
        let b = identity_id("git", "a@x", "alice", "");
        assert_eq!(a, b);
    }

    #[test]
    fn different_fields_give_different_ids() {
        assert_ne!(
            identity_id("git", "a@x", "Alice", ""),
            identity_id("git", "b@x", "Alice", "")
        );
        assert_ne!(
            repository_id("", "https://github.com/a/b", "github"),
            repository_id("", "https://github.com/a/c", "github")
        );
    }

    #[test]
    fn commit_id_depends_on_repo_and_sha() {
        let repo = repository_id("1", "https://github.com/a/b", "github");
        let c1 = commit_id(&repo, "aaaa");
        let c2 = commit_id(&repo, "bbbb");
        assert_ne!(c1, c2);
        assert_eq!(c1, commit_id(&repo, "aaaa"));
    }
}
