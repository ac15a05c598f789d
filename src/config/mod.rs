//! Runtime configuration
//!
//! Resolves the CLI flags against their environment-variable overrides
//! (the environment wins, matching the container deployments this connector
//! runs in), derives the repo name and endpoint key, and validates the
//! required fields.

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};

use crate::cli::Cli;

pub const CONNECTOR: &str = "git-connector";
pub const CONNECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_REPOS_PATH: &str = "/tmp/git-repositories";
pub const DEFAULT_CACHE_PATH: &str = "/tmp/git-cache";
pub const DEFAULT_STREAM: &str = "PUT-S3-git-commits";

/// Commits per published pack.
pub const PACK_SIZE: usize = 1000;
/// Commit count at which a repository is treated as hot (sharded cache).
pub const HOT_REPO_COUNT: i64 = 50_000;
/// Width of one sync window, in days.
pub const WINDOW_DAYS: i64 = 30;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub repos_path: String,
    pub cache_path: String,
    pub skip_cache_cleanup: bool,
    pub stream: String,
    pub source_id: String,
    pub repository_source: String,
    pub workers: usize,
    pub repo_name: String,
    pub endpoint: String,
    pub stage: String,
    /// Resync start from the LAST_SYNC env var (unix seconds).
    pub last_sync_env: Option<DateTime<Utc>>,
    pub gitops_fatal: bool,
    pub orphans_fatal: bool,
    pub pair_programming: bool,
}

fn env_or(flag: Option<&str>, env_key: &str, default: &str) -> String {
    if let Ok(v) = std::env::var(env_key) {
        if !v.is_empty() {
            return v;
        }
    }
    match flag {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

fn env_bool(flag: bool, env_key: &str) -> bool {
    match std::env::var(env_key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "yes"),
        Err(_) => flag,
    }
}

impl Config {
    /// Resolve flags and environment into a validated configuration.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let url = env_or(cli.git_url.as_deref(), "GIT_URL", "")
            .trim()
            .trim_end_matches('/')
            .to_string();
        let repos_path = env_or(
            cli.git_repos_path.as_deref(),
            "GIT_REPOS_PATH",
            DEFAULT_REPOS_PATH,
        )
        .trim_end_matches('/')
        .to_string();
        let cache_path = env_or(
            cli.git_cache_path.as_deref(),
            "GIT_CACHE_PATH",
            DEFAULT_CACHE_PATH,
        )
        .trim_end_matches('/')
        .to_string();
        // an explicitly empty stream selects log-only publishing
        let stream = match std::env::var("GIT_STREAM") {
            Ok(v) => v,
            Err(_) => cli
                .git_stream
                .clone()
                .unwrap_or_else(|| DEFAULT_STREAM.to_string()),
        };
        let source_id = env_or(cli.git_source_id.as_deref(), "GIT_SOURCE_ID", "")
            .trim()
            .to_string();
        let repository_source = env_or(
            cli.git_repository_source.as_deref(),
            "GIT_REPOSITORY_SOURCE",
            "",
        )
        .trim()
        .to_string();

        let last_sync_env = match std::env::var("LAST_SYNC") {
            Ok(v) if !v.is_empty() => {
                let secs: i64 = v
                    .parse()
                    .map_err(|_| anyhow::anyhow!("LAST_SYNC must be unix seconds, got '{v}'"))?;
                Some(Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
                    anyhow::anyhow!("LAST_SYNC out of range: {secs}")
                })?)
            }
            _ => None,
        };

        let config = Self {
            repo_name: repo_name(&url),
            endpoint: endpoint_key(&url),
            url,
            repos_path,
            cache_path,
            skip_cache_cleanup: env_bool(cli.git_skip_cache_cleanup, "GIT_SKIP_CACHE_CLEANUP"),
            stream,
            source_id,
            repository_source,
            workers: cli.workers.max(1),
            stage: std::env::var("STAGE").unwrap_or_default(),
            last_sync_env,
            gitops_fatal: true,
            orphans_fatal: true,
            pair_programming: true,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.repo_name.is_empty() {
            bail!("repo name must be set (is --git-url missing?)");
        }
        if self.repository_source.is_empty() {
            bail!("repository source must be set, eg: git, github, gerrit");
        }
        Ok(())
    }
}

/// Last path segment of the repository URL.
pub fn repo_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Endpoint key: the URL with its scheme stripped and slashes flattened.
pub fn endpoint_key(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("git://")
        .trim_start_matches("http://")
        .replace('/', "-")
}
