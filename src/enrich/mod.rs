//! Commit enrichment
//!
//! Turns a parsed [`RawCommit`] into the published payload shape: timezone
//! variants, message truncation, branch and URL resolution, per-extension
//! file statistics, and the contributor list.

pub mod contributors;
pub mod url;

use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};

use crate::git::parser::RawCommit;
use crate::identity;
use crate::models::{CommitFilesByType, CommitPayload, Pls};

/// Maximum transported message length, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 0x4000;
/// Extension bucket for files without a usable extension.
pub const UNKNOWN_EXTENSION: &str = "UNKNOWN";

/// Weekday and hour of a timestamp, in the UTC and original-offset frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFrames {
    pub weekday: u32,
    pub hour: u32,
    pub utc_weekday: u32,
    pub utc_hour: u32,
}

impl TimeFrames {
    pub fn of(dt: DateTime<FixedOffset>) -> Self {
        let utc = dt.with_timezone(&Utc);
        Self {
            weekday: dt.weekday().num_days_from_sunday(),
            hour: dt.hour(),
            utc_weekday: utc.weekday().num_days_from_sunday(),
            utc_hour: utc.hour(),
        }
    }
}

/// An enriched commit: the wire payload plus run-local annotations that are
/// never published.
#[derive(Debug, Clone)]
pub struct EnrichedCommit {
    pub payload: CommitPayload,
    pub title: Option<String>,
    pub message_full: Option<String>,
    pub authored_frames: TimeFrames,
    pub committed_frames: TimeFrames,
    pub repo_type: &'static str,
}

/// Immutable per-run context shared by all enrichment workers.
pub struct Enricher {
    pub repository_url: String,
    pub repository_source: String,
    pub repository_id: String,
    pub default_branch: String,
    pub head_sha: String,
    pub head_cloc: i64,
    pub loc: i64,
    pub pls: Vec<Pls>,
    pub orphaned: HashSet<String>,
    pub pair_programming: bool,
}

impl Enricher {
    /// Enrich one raw commit. Missing or unparseable dates fail the commit.
    pub fn enrich(&self, raw: &RawCommit) -> Result<EnrichedCommit> {
        let author_date = raw
            .header("AuthorDate")
            .ok_or_else(|| anyhow!("commit {}: missing AuthorDate", raw.sha))?;
        let authored = parse_date_tz(author_date)
            .ok_or_else(|| anyhow!("commit {}: cannot parse author date '{}'", raw.sha, author_date))?;
        let commit_date = raw
            .header("CommitDate")
            .ok_or_else(|| anyhow!("commit {}: missing CommitDate", raw.sha))?;
        let committed = parse_date_tz(commit_date)
            .ok_or_else(|| anyhow!("commit {}: cannot parse commit date '{}'", raw.sha, commit_date))?;

        let title = raw
            .message
            .as_ref()
            .map(|m| m.lines().next().unwrap_or_default().to_string());
        let message = raw.message.as_ref().map(|m| truncate_chars(m, MAX_MESSAGE_LENGTH));

        let short_hash = if raw.sha.len() > 7 {
            raw.sha[..7].to_string()
        } else {
            raw.sha.clone()
        };
        let (commit_url, repo_type) = url::commit_url(&self.repository_url, &raw.sha);

        let dt_diff = (committed.with_timezone(&Utc) - authored.with_timezone(&Utc))
            .num_seconds() as f64
            / 3600.0;
        let time_to_commit_hours = (dt_diff * 100.0).round() / 100.0;

        let commit_tags: Vec<String> = raw
            .refs
            .iter()
            .filter(|r| r.contains("tag: "))
            .cloned()
            .collect();

        let (github_repo, url_id) = github_fields(&self.repository_url, &raw.sha);

        let files = self.rollup_files(raw);
        let payload = CommitPayload {
            id: identity::commit_id(&self.repository_id, &raw.sha),
            sha: raw.sha.clone(),
            short_hash,
            url: commit_url,
            repository_id: self.repository_id.clone(),
            repository_url: self.repository_url.clone(),
            branch: raw.branch.clone(),
            default_branch: raw.branch == self.default_branch,
            message,
            parent_shas: raw.parents.clone(),
            authored_timestamp: authored,
            authored_local_timestamp: authored.to_rfc3339(),
            committed_timestamp: committed,
            committed_local_timestamp: committed.to_rfc3339(),
            doc_commit: raw.doc_commit,
            merge_commit: raw.files.is_empty(),
            orphaned: self.orphaned.contains(&raw.sha),
            commit_tags,
            time_to_commit_hours,
            repo_short_name: url::repo_short_name(&self.repository_url),
            github_repo,
            url_id,
            is_parent_commit: false,
            contributors: contributors::build(raw, &self.repository_source, self.pair_programming),
            files,
            total_lines_of_code: self.loc,
            program_language_summary: self.pls.clone(),
            sync_timestamp: Utc::now(),
        };

        Ok(EnrichedCommit {
            payload,
            title,
            message_full: raw.message.clone(),
            authored_frames: TimeFrames::of(authored),
            committed_frames: TimeFrames::of(committed),
            repo_type,
        })
    }

    /// Aggregate file deltas by extension, in sorted extension order.
    ///
    /// The head-commit LOC count, when known, is stamped on the last bucket.
    fn rollup_files(&self, raw: &RawCommit) -> Vec<CommitFilesByType> {
        let mut buckets: BTreeMap<String, CommitFilesByType> = BTreeMap::new();
        for delta in &raw.files {
            let action = match &delta.action {
                Some(action) => action.as_str(),
                None => continue,
            };
            let ext = file_extension(&delta.path);
            let bucket = buckets.entry(ext.clone()).or_insert_with(|| CommitFilesByType {
                file_type: ext,
                ..Default::default()
            });
            bucket.lines_added += delta.added.unwrap_or(0);
            bucket.lines_removed += delta.removed.unwrap_or(0);
            match action {
                "M" => bucket.files_modified += 1,
                "D" => bucket.files_deleted += 1,
                _ => bucket.files_created += 1,
            }
        }
        let mut files: Vec<CommitFilesByType> = buckets.into_values().collect();
        if raw.sha == self.head_sha && self.head_cloc != 0 {
            if let Some(last) = files.last_mut() {
                last.actual_lines_of_code = Some(self.head_cloc);
            }
        }
        files
    }
}

/// Extension of a file path; `UNKNOWN` when there is no usable extension.
pub fn file_extension(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_string(),
        _ => UNKNOWN_EXTENSION.to_string(),
    }
}

/// Parse a git date preserving its original offset. Accepts the `fuller`
/// pretty format, RFC 2822, and RFC 3339.
pub fn parse_date_tz(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y %z") {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt);
    }
    DateTime::parse_from_rfc3339(s).ok()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn github_fields(origin: &str, sha: &str) -> (Option<String>, Option<String>) {
    const GITHUB_URL: &str = "https://github.com/";
    if !origin.contains(GITHUB_URL) {
        return (None, None);
    }
    let repo = origin.replace(GITHUB_URL, "");
    let repo = repo.trim_end_matches(".git").to_string();
    let url_id = format!("{repo}/commit/{sha}");
    (Some(repo), Some(url_id))
}
