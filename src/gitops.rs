//! LOC and programming-language collection
//!
//! Shells out to the external `gitops` helper for the repository-level line
//! count and language summary, and to `cloc commit <sha> --json` for the
//! HEAD code count. Both tools are opaque subprocesses; only their JSON
//! output is interpreted here.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::models::Pls;

/// Repository LOC statistics as reported by the gitops helper.
#[derive(Debug, Clone, Default)]
pub struct GitStats {
    pub loc: i64,
    pub pls: Vec<Pls>,
}

/// The gitops helper reports pls fields as strings.
#[derive(Debug, Deserialize)]
struct RawPls {
    language: String,
    files: String,
    blank: String,
    comment: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct GitopsOutput {
    loc: i64,
    #[serde(default)]
    pls: Vec<RawPls>,
}

/// One language row of `cloc --json` output; only the code count is used,
/// the blank/comment/nFiles columns are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
struct ClocEntry {
    #[serde(default)]
    code: i64,
}

/// Run the gitops helper for `url` and parse its summary.
///
/// On failure: fatal mode propagates the error, otherwise the run continues
/// with zero LOC and no languages.
pub fn collect(
    url: &str,
    repos_path: &str,
    cache_path: &str,
    skip_cleanup: bool,
    fatal: bool,
) -> Result<GitStats> {
    let mut cmd = Command::new("gitops");
    cmd.arg(url)
        .env("DA_GIT_REPOS_PATH", repos_path)
        .env("DA_GIT_CACHE_PATH", cache_path);
    if skip_cleanup {
        cmd.env("SKIP_CLEANUP", "1");
    }
    match run_json::<GitopsOutput>(cmd, "gitops") {
        Ok(out) => Ok(GitStats {
            loc: out.loc,
            pls: out
                .pls
                .into_iter()
                .map(|p| Pls {
                    language: p.language,
                    files: p.files.parse().unwrap_or(0),
                    blank: p.blank.parse().unwrap_or(0),
                    comment: p.comment.parse().unwrap_or(0),
                    code: p.code.parse().unwrap_or(0),
                })
                .collect(),
        }),
        Err(e) if fatal => Err(e),
        Err(e) => {
            warn!("gitops failed, continuing with empty stats: {e:#}");
            Ok(GitStats::default())
        }
    }
}

/// `cloc commit <sha> --json` inside the clone; returns the SUM code count.
pub fn head_cloc(git_path: &Path, sha: &str, fatal: bool) -> Result<i64> {
    let mut cmd = Command::new("cloc");
    cmd.args(["commit", sha, "--json"])
        .current_dir(git_path)
        .env("LANG", "C")
        .env("PAGER", "");
    match run_json::<HashMap<String, ClocEntry>>(cmd, "cloc") {
        Ok(map) => Ok(map.get("SUM").cloned().unwrap_or_default().code),
        Err(e) if fatal => Err(e),
        Err(e) => {
            warn!("cloc failed, continuing without head count: {e:#}");
            Ok(0)
        }
    }
}

fn run_json<T: serde::de::DeserializeOwned>(mut cmd: Command, name: &str) -> Result<T> {
    let out = cmd
        .output()
        .with_context(|| format!("failed to spawn {name}"))?;
    if !out.status.success() {
        bail!(
            "{name} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    serde_json::from_str(stdout.trim())
        .with_context(|| format!("cannot parse {name} output: '{}'", stdout.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gitops_payload() {
        let json = r#"{"loc": 120, "pls": [
            {"language":"Rust","files":"3","blank":"10","comment":"5","code":"105"},
            {"language":"TOML","files":"1","blank":"0","comment":"x","code":"15"}
        ]}"#;
        let out: GitopsOutput = serde_json::from_str(json).unwrap();
        assert_eq!(out.loc, 120);
        let pls: Vec<Pls> = out
            .pls
            .into_iter()
            .map(|p| Pls {
                language: p.language,
                files: p.files.parse().unwrap_or(0),
                blank: p.blank.parse().unwrap_or(0),
                comment: p.comment.parse().unwrap_or(0),
                code: p.code.parse().unwrap_or(0),
            })
            .collect();
        assert_eq!(pls[0].code, 105);
        // malformed numeric strings degrade to zero
        assert_eq!(pls[1].comment, 0);
    }

    #[test]
    fn parses_cloc_sum() {
        let json = r#"{"Rust": {"code": 90, "blank": 4, "comment": 2, "nFiles": 3},
                       "SUM": {"code": 105, "blank": 5, "comment": 2, "nFiles": 4}}"#;
        let map: HashMap<String, ClocEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(map["SUM"].code, 105);
        assert_eq!(map["Rust"].code, 90);
    }

    #[test]
    fn missing_tool_is_nonfatal_when_configured() {
        let stats = collect("https://example.org/x", "/nonexistent", "/nonexistent", false, false)
            .unwrap();
        assert_eq!(stats.loc, 0);
        assert!(stats.pls.is_empty());
    }
}
