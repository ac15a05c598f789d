//! Orphaned-commit detection
//!
//! Runs the external `detect-removed-commits.sh` script inside the clone.
//! It prints the SHAs of commits that exist in the object database but are
//! no longer reachable from any ref (dropped or squashed-out commits), as a
//! space-separated list.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

const DETECT_COMMAND: &str = "detect-removed-commits.sh";

/// Collect the orphaned-commit SHA set for a clone.
///
/// On failure: fatal mode propagates the error, otherwise the run continues
/// with an empty set.
pub fn detect(git_path: &Path, fatal: bool) -> Result<HashSet<String>> {
    match run(git_path) {
        Ok(shas) => {
            info!("found {} orphaned commits", shas.len());
            Ok(shas)
        }
        Err(e) if fatal => Err(e),
        Err(e) => {
            warn!("orphan detection failed, continuing with empty set: {e:#}");
            Ok(HashSet::new())
        }
    }
}

fn run(git_path: &Path) -> Result<HashSet<String>> {
    let out = Command::new(DETECT_COMMAND)
        .current_dir(git_path)
        .env("LANG", "C")
        .env("PAGER", "")
        .output()
        .with_context(|| format!("failed to spawn {DETECT_COMMAND}"))?;
    if !out.status.success() {
        bail!(
            "{DETECT_COMMAND} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    }
    Ok(parse_output(&String::from_utf8_lossy(&out.stdout)))
}

fn parse_output(stdout: &str) -> HashSet<String> {
    stdout
        .split_whitespace()
        .filter(|sha| !sha.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_space_separated_shas() {
        let shas = parse_output("aaa bbb  ccc \n");
        assert_eq!(shas.len(), 3);
        assert!(shas.contains("bbb"));
    }

    #[test]
    fn empty_output_gives_empty_set() {
        assert!(parse_output("").is_empty());
        assert!(parse_output("   \n").is_empty());
    }

    #[test]
    fn missing_script_is_nonfatal_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let shas = detect(dir.path(), false).unwrap();
        assert!(shas.is_empty());
    }
}
