//! Contributor assembly
//!
//! Builds the contributor list of an enriched commit from the author and
//! committer headers plus the trailer-derived roles, applying the
//! same-as-author policy and the author-over-co-author precedence.

use std::collections::HashSet;

use crate::git::authors;
use crate::git::parser::RawCommit;
use crate::identity;
use crate::models::{Contributor, Role};
use crate::trailers::CanonicalTrailer;

/// Build the deduplicated contributor list for a commit.
///
/// Authors share `weight = 1/N`; every other role carries `1.0`. Trailers
/// whose role disallows matching the commit author are dropped when they
/// name the author, and any co-author whose identity also appears as an
/// author is removed (authors supersede co-authors).
pub fn build(raw: &RawCommit, source: &str, pair_programming: bool) -> Vec<Contributor> {
    let mut contributors: Vec<Contributor> = Vec::new();

    let (author_strs, first_author) = match raw.header("Author") {
        Some(author) => authors::author_set(author, pair_programming),
        None => (Vec::new(), String::new()),
    };
    let n_authors = author_strs.len().max(1);
    let author_weight = 1.0 / n_authors as f64;
    for auth in &author_strs {
        contributors.push(contributor(source, auth, Role::Author, author_weight));
    }

    if let Some(committer) = raw.header("Commit") {
        let (committer_strs, _) = authors::author_set(committer, pair_programming);
        for comm in &committer_strs {
            contributors.push(contributor(source, comm, Role::Committer, 1.0));
        }
    }

    let first_author = first_author.trim();
    for trailer in CanonicalTrailer::role_bearing() {
        let role = match trailer.role() {
            Some(role) => role,
            None => continue,
        };
        for value in raw.trailer_values(trailer.as_str()) {
            let value = value.trim();
            if !trailer.allows_same_as_author() && value == first_author {
                continue;
            }
            contributors.push(contributor(source, value, role, 1.0));
        }
    }

    dedup(contributors)
}

fn contributor(source: &str, raw: &str, role: Role, weight: f64) -> Contributor {
    let ident = authors::parse_author(raw);
    Contributor {
        identity: identity::make_identity(source, &ident.name, &ident.email, ""),
        role,
        weight,
    }
}

/// Drop duplicate (identity, role) pairs, then co-authors shadowed by an
/// author entry with the same identity.
fn dedup(contributors: Vec<Contributor>) -> Vec<Contributor> {
    let mut seen: HashSet<(String, Role)> = HashSet::new();
    let mut unique: Vec<Contributor> = Vec::with_capacity(contributors.len());
    for c in contributors {
        if seen.insert((c.identity.id.clone(), c.role)) {
            unique.push(c);
        }
    }

    let author_ids: HashSet<String> = unique
        .iter()
        .filter(|c| c.role == Role::Author)
        .map(|c| c.identity.id.clone())
        .collect();
    unique.retain(|c| c.role != Role::CoAuthor || !author_ids.contains(&c.identity.id));
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::parser::TrailerValue;

    fn raw_commit(author: &str, committer: &str) -> RawCommit {
        let mut raw = RawCommit::default();
        raw.attrs.insert(
            "Author".to_string(),
            TrailerValue::Single(author.to_string()),
        );
        raw.attrs.insert(
            "Commit".to_string(),
            TrailerValue::Single(committer.to_string()),
        );
        raw
    }

    fn add_trailer(raw: &mut RawCommit, name: &str, value: &str) {
        match raw.attrs.get_mut(name) {
            Some(TrailerValue::Many(values)) => values.push(value.to_string()),
            _ => {
                raw.attrs.insert(
                    name.to_string(),
                    TrailerValue::Many(vec![value.to_string()]),
                );
            }
        }
    }

    #[test]
    fn single_author_committer_signer() {
        let mut raw = raw_commit("Alice <a@x>", "Alice <a@x>");
        add_trailer(&mut raw, "Signed-off-by", "Alice <a@x>");
        let got = build(&raw, "git", true);

        let roles: Vec<Role> = got.iter().map(|c| c.role).collect();
        assert_eq!(roles, vec![Role::Author, Role::Committer, Role::Signer]);
        assert!(got.iter().all(|c| (c.weight - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn pair_programming_splits_weight() {
        let raw = raw_commit("Ann Alpha and Bob Beta <b@x>", "Bob Beta <b@x>");
        let got = build(&raw, "git", true);
        let authors: Vec<&Contributor> =
            got.iter().filter(|c| c.role == Role::Author).collect();
        assert_eq!(authors.len(), 2);
        for a in &authors {
            assert!((a.weight - 0.5).abs() < f64::EPSILON);
            assert_eq!(a.identity.email, "b@x");
        }
        let total: f64 = authors.iter().map(|a| a.weight).sum();
        assert!((total - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn co_author_matching_author_dropped() {
        let mut raw = raw_commit("Alice <a@x>", "Carol <c@x>");
        // exact author string: filtered by the same-as-author policy
        add_trailer(&mut raw, "Co-authored-by", "Alice <a@x>");
        let got = build(&raw, "git", true);
        assert!(got.iter().all(|c| c.role != Role::CoAuthor));
    }

    #[test]
    fn co_author_with_author_identity_superseded() {
        let mut raw = raw_commit("Alice <a@x>", "Carol <c@x>");
        // different string, same identity after parsing
        add_trailer(&mut raw, "Co-authored-by", "Alice  <a@x>");
        let got = build(&raw, "git", true);
        assert!(got.iter().any(|c| c.role == Role::Author));
        assert!(got.iter().all(|c| c.role != Role::CoAuthor));
    }

    #[test]
    fn distinct_co_author_kept_with_full_weight() {
        let mut raw = raw_commit("Alice <a@x>", "Alice <a@x>");
        add_trailer(&mut raw, "Co-authored-by", "Dave <d@x>");
        let got = build(&raw, "git", true);
        let co: Vec<&Contributor> = got.iter().filter(|c| c.role == Role::CoAuthor).collect();
        assert_eq!(co.len(), 1);
        assert!((co[0].weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reviewer_same_as_author_dropped_tester_kept() {
        let mut raw = raw_commit("Alice <a@x>", "Alice <a@x>");
        add_trailer(&mut raw, "Reviewed-by", "Alice <a@x>");
        add_trailer(&mut raw, "Tested-by", "Alice <a@x>");
        let got = build(&raw, "git", true);
        assert!(got.iter().all(|c| c.role != Role::Reviewer));
        assert!(got.iter().any(|c| c.role == Role::Tester));
    }

    #[test]
    fn duplicate_identity_role_pairs_collapse() {
        let mut raw = raw_commit("Alice <a@x>", "Alice <a@x>");
        // e.g. Reviewed-by and Acked-by lines naming the same person both
        // canonicalise to Reviewed-by
        add_trailer(&mut raw, "Reviewed-by", "Rob <r@x>");
        add_trailer(&mut raw, "Reviewed-by", "Rob  <r@x>");
        let got = build(&raw, "git", true);
        let reviewers: Vec<&Contributor> =
            got.iter().filter(|c| c.role == Role::Reviewer).collect();
        assert_eq!(reviewers.len(), 1);
    }
}
