//! CLI command definitions and handlers

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::Config;
use crate::publish::{FsPublisher, LogPublisher, Publisher};
use crate::report::{JobLog, JobStatus};
use crate::store::FsStore;
use crate::sync;

/// Gitingest - git repository ingestion engine
///
/// Clones a repository, parses its history, and publishes enriched,
/// deduplicated commit events.
#[derive(Parser, Debug)]
#[command(name = "gitingest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// git repo URL, for example https://github.com/cncf/devstats
    #[arg(long)]
    pub git_url: Option<String>,

    /// path to store git repo clones
    #[arg(long)]
    pub git_repos_path: Option<String>,

    /// path to store gitops results cache
    #[arg(long)]
    pub git_cache_path: Option<String>,

    /// skip gitops cache cleanup
    #[arg(long)]
    pub git_skip_cache_cleanup: bool,

    /// stream to publish commits to (empty logs events instead)
    #[arg(long)]
    pub git_stream: Option<String>,

    /// repository source id
    #[arg(long)]
    pub git_source_id: Option<String>,

    /// repository source, for example git, github or gerrit
    #[arg(long)]
    pub git_repository_source: Option<String>,

    /// Number of parallel enrichment workers
    #[arg(long, global = true, default_value = "8")]
    pub workers: usize,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync the repository (default)
    Sync,

    /// Show version info
    Version,
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Version) => {
            println!("gitingest {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Sync) | None => sync_command(&cli),
    }
}

fn sync_command(cli: &Cli) -> Result<()> {
    let config = Config::resolve(cli)?;
    let store = FsStore::new(format!("{}/state", config.cache_path));
    let publisher: Box<dyn Publisher> = if config.stream.is_empty() {
        Box::new(LogPublisher)
    } else {
        Box::new(FsPublisher::new(format!(
            "{}/streams/{}",
            config.cache_path, config.stream
        )))
    };

    let job_log = JobLog::new(&store, config.endpoint.clone());
    job_log.write(JobStatus::InProgress, "")?;

    match sync::run(&config, &store, publisher.as_ref(), None) {
        Ok(outcome) => {
            job_log.write(JobStatus::Done, "")?;
            println!(
                "{}: {} created, {} updated, {} orphaned",
                config.url, outcome.created, outcome.updated, outcome.orphaned
            );
            Ok(())
        }
        Err(e) => {
            error!("sync failed: {e:#}");
            job_log.write(JobStatus::Failed, &format!("{e:#}"))?;
            Err(e)
        }
    }
}
