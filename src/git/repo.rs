//! Git repository access via the `git` binary
//!
//! Maintains a bare clone per repository URL and exposes the handful of
//! plumbing commands the sync controller needs. Every invocation pins
//! `LANG=C` and an empty `PAGER` so output is stable and uncolored.

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use tracing::debug;

/// Options always passed to `git log` so the parser sees one stable format.
const LOG_OPTIONS: &[&str] = &[
    "--raw",
    "--numstat",
    "--pretty=fuller",
    "--decorate=full",
    "--parents",
    "-M",
    "-C",
    "-c",
];

fn git_command(dir: Option<&Path>) -> Command {
    let mut cmd = Command::new("git");
    // TZ pins the interpretation of bare --since/--until timestamps
    cmd.env("LANG", "C").env("PAGER", "").env("TZ", "UTC");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd
}

/// A bare clone of a remote repository.
pub struct GitRepo {
    url: String,
    path: PathBuf,
}

impl GitRepo {
    /// Ensure a bare clone of `url` exists under `repos_path`, cloning it if
    /// missing, and verify it looks like a git directory.
    pub fn ensure(repos_path: &str, url: &str) -> Result<Self> {
        let path = Path::new(repos_path).join(format!("{}-git", sanitize_url(url)));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        if !path.is_dir() {
            debug!("cloning {} to {}", url, path.display());
            let out = git_command(None)
                .args(["clone", "--bare", url])
                .arg(&path)
                .output()
                .context("failed to spawn git clone")?;
            if !out.status.success() {
                bail!(
                    "git clone --bare {} failed: {}",
                    url,
                    String::from_utf8_lossy(&out.stderr)
                );
            }
        }
        let head = path.join("HEAD");
        if !head.is_file() {
            bail!("missing {} file", head.display());
        }
        Ok(Self {
            url: url.to_string(),
            path,
        })
    }

    /// Open an existing clone without touching the network (used in tests).
    pub fn open(path: impl Into<PathBuf>, url: &str) -> Result<Self> {
        let path = path.into();
        if !path.join("HEAD").is_file() && !path.join(".git").exists() {
            bail!("{} is not a git repository", path.display());
        }
        Ok(Self {
            url: url.to_string(),
            path,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let out = git_command(Some(&self.path))
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn git {}", args.join(" ")))?;
        if !out.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    /// Fetch all heads from origin, pruning deleted ones.
    pub fn fetch(&self) -> Result<()> {
        debug!("updating repo {}", self.url);
        self.run(&["fetch", "origin", "+refs/heads/*:refs/heads/*", "--prune"])?;
        Ok(())
    }

    /// All branch names plus the default branch (marked with `*`).
    pub fn branches(&self) -> Result<(String, HashSet<String>)> {
        let sout = self.run(&["branch", "-a"])?;
        let mut default = String::new();
        let mut branches = HashSet::new();
        for line in sout.lines() {
            let mut branch = line.trim();
            if branch.is_empty() {
                continue;
            }
            if let Some(rest) = branch.strip_prefix("* ") {
                branch = rest;
                default = branch.to_string();
            }
            branches.insert(branch.to_string());
        }
        Ok((default, branches))
    }

    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn head_author_date(&self) -> Result<DateTime<FixedOffset>> {
        let sout = self.run(&["show", "-s", "--format=%aI", "HEAD"])?;
        DateTime::parse_from_rfc3339(sout.trim())
            .with_context(|| format!("cannot parse HEAD author date: '{}'", sout.trim()))
    }

    /// Number of commits reachable from `branch`.
    pub fn commit_count(&self, branch: &str) -> Result<i64> {
        let sout = self.run(&["rev-list", "--count", branch])?;
        sout.trim()
            .parse()
            .with_context(|| format!("cannot parse rev-list count: '{}'", sout.trim()))
    }

    /// Sha and author date of the repository's first commit.
    ///
    /// Streams `git log --reverse` and stops after the first line rather
    /// than materializing the whole history.
    pub fn first_commit(&self) -> Result<(String, DateTime<FixedOffset>)> {
        let mut child = git_command(Some(&self.path))
            .args(["log", "--reverse", "--pretty=format:%H %aI"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn git log for first commit")?;
        let stdout = child.stdout.take().context("no stdout from git log")?;
        let mut first = String::new();
        BufReader::new(stdout).read_line(&mut first)?;
        let _ = child.kill();
        let _ = child.wait();

        let mut parts = first.trim().splitn(2, ' ');
        let sha = parts.next().unwrap_or_default().to_string();
        let date = parts.next().context("first commit line has no date")?;
        if sha.len() != 40 {
            bail!("cannot determine first commit from '{}'", first.trim());
        }
        let when = DateTime::parse_from_rfc3339(date)
            .with_context(|| format!("cannot parse first commit date: '{}'", date))?;
        Ok((sha, when))
    }

    /// Spawn `git log --reverse --topo-order` over an optional date window
    /// and hand back the child plus a buffered reader over its stdout.
    pub fn log_stream(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<(Child, BufReader<ChildStdout>)> {
        let mut cmd = git_command(Some(&self.path));
        cmd.args(["log", "--reverse", "--topo-order"]);
        cmd.args(LOG_OPTIONS);
        if let Some(since) = since {
            cmd.arg(format!("--since={}", since.format("%Y-%m-%d %H:%M:%S")));
        }
        if let Some(until) = until {
            cmd.arg(format!("--until={}", until.format("%Y-%m-%d %H:%M:%S")));
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        let mut child = cmd.spawn().context("failed to spawn git log")?;
        let stdout = child.stdout.take().context("no stdout from git log")?;
        Ok((child, BufReader::new(stdout)))
    }
}

/// Make a repository URL safe to use as a directory name.
fn sanitize_url(url: &str) -> String {
    url.replace("://", "-").replace(['/', ':'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_scheme_and_slashes() {
        assert_eq!(
            sanitize_url("https://github.com/org/repo"),
            "https-github.com-org-repo"
        );
        assert_eq!(
            sanitize_url("git://host/a/b"),
            "git-host-a-b"
        );
    }

    #[test]
    fn open_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitRepo::open(dir.path(), "x").is_err());
    }
}
