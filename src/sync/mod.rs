//! Sync controller
//!
//! Orchestrates one ingestion run:
//! 1. resolve the date range (LAST_SYNC env, persisted watermark, or the
//!    repository's first commit minus 60 seconds)
//! 2. prepare the bare clone and discover branches / HEAD
//! 3. run the LOC and orphan collectors in background threads and barrier
//!    on both before any commit is enriched
//! 4. walk history forward in 30-day windows, enriching each window in
//!    reverse order across a bounded worker pool
//! 5. batch enriched commits into packs of 1000, deduplicate against the
//!    cache, publish, and stamp the returned storage path onto the pack's
//!    cache rows
//! 6. reconcile orphaned cache entries and persist the new watermark

use std::thread;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Datelike, Duration, Utc};
use crossbeam_channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheDecision, CacheEntry, CommitCache, YearHalf};
use crate::config::{Config, HOT_REPO_COUNT, PACK_SIZE, WINDOW_DAYS};
use crate::dedup;
use crate::enrich::{url, EnrichedCommit, Enricher};
use crate::git::parser::{LogParser, RawCommit};
use crate::git::GitRepo;
use crate::gitops;
use crate::identity;
use crate::models::{CommitPayload, EventAction, LastSync};
use crate::orphans;
use crate::publish::{self, Publisher};
use crate::report::{self, ReportData};
use crate::store::ObjectStore;

/// External repository-source lookup (GitHub API and friends).
///
/// The real implementation lives outside this crate; `None` disables the
/// lookup and keeps whatever source id was configured.
pub trait SourceLookup {
    fn source_id(&self, source: &str, url: &str) -> Result<Option<String>>;
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub commits: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub orphaned: usize,
}

/// Run one sync for the configured repository.
pub fn run(
    config: &Config,
    store: &dyn ObjectStore,
    publisher: &dyn Publisher,
    lookup: Option<&dyn SourceLookup>,
) -> Result<SyncOutcome> {
    // LOC collection only needs the URL and cache paths; start it first so
    // it overlaps with clone/fetch.
    let gitops_handle = {
        let (url, repos, cache, skip, fatal) = (
            config.url.clone(),
            config.repos_path.clone(),
            config.cache_path.clone(),
            config.skip_cache_cleanup,
            config.gitops_fatal,
        );
        thread::spawn(move || gitops::collect(&url, &repos, &cache, skip, fatal))
    };

    let repo = GitRepo::ensure(&config.repos_path, &config.url)?;
    repo.fetch()?;

    let orphans_handle = {
        let (path, fatal) = (repo.path().to_path_buf(), config.orphans_fatal);
        thread::spawn(move || orphans::detect(&path, fatal))
    };

    let (default_branch, _branches) = repo.branches()?;
    let head_sha = repo.head_sha()?;
    let head_date = repo.head_author_date()?.with_timezone(&Utc);
    let (_first_sha, first_date) = repo.first_commit()?;
    let first_commit_at = first_date.with_timezone(&Utc);
    let head_cloc = gitops::head_cloc(repo.path(), &head_sha, config.gitops_fatal)?;
    let commit_count = repo.commit_count(&default_branch)?;
    let hot = commit_count >= HOT_REPO_COUNT;

    let mut cache = CommitCache::new(store, config.endpoint.clone(), hot);

    // Resolve the resume point: LAST_SYNC env wins, then the persisted
    // watermark, then the first commit minus a minute of slack.
    let resync = config.last_sync_env.is_some();
    let date_from = match config.last_sync_env {
        Some(from) => Some(from),
        None => cache.last_sync()?.map(|ls| ls.last_sync),
    };
    let mut from = first_commit_at - Duration::seconds(60);
    if let Some(df) = date_from {
        if df > from {
            from = df;
        }
    }
    info!(
        "{} fetching from {} till {} ({} workers, {} commits, hot={})",
        config.url, from, head_date, config.workers, commit_count, hot
    );

    cache.load(resync, from)?;

    // Repository source id: gerrit slugs derive from the URL, GitHub goes
    // through the external lookup when one is wired in.
    let mut source_id = config.source_id.clone();
    match config.repository_source.as_str() {
        "gerrit" => {
            let derived = url::gerrit_source_id(&config.url);
            if !derived.is_empty() {
                source_id = derived;
            }
        }
        "github" => {
            if let Some(lookup) = lookup {
                match lookup.source_id(&config.repository_source, &config.url) {
                    Ok(Some(id)) => source_id = id,
                    Ok(None) => {}
                    Err(e) => warn!("source id lookup failed: {e:#}"),
                }
            }
        }
        _ => {}
    }
    let repository_id =
        identity::repository_id(&source_id, &config.url, &config.repository_source);

    // Barrier: both collectors must finish before any commit leaves
    // enrichment.
    let stats = gitops_handle
        .join()
        .map_err(|_| anyhow::anyhow!("gitops thread panicked"))??;
    let orphaned = orphans_handle
        .join()
        .map_err(|_| anyhow::anyhow!("orphan detection thread panicked"))??;
    debug!("loc: {}, languages: {}", stats.loc, stats.pls.len());

    let enricher = Enricher {
        repository_url: config.url.clone(),
        repository_source: config.repository_source.clone(),
        repository_id,
        default_branch: default_branch.clone(),
        head_sha: head_sha.clone(),
        head_cloc,
        loc: stats.loc,
        pls: stats.pls,
        orphaned,
        pair_programming: config.pair_programming,
    };

    let mut controller = Controller {
        config,
        store,
        publisher,
        cache,
        head_sha,
        first_commit_at,
        commit_count,
        watermark: None,
        seen_shas: FxHashSet::default(),
        outcome: SyncOutcome::default(),
        pack: Vec::with_capacity(PACK_SIZE),
    };

    let total_windows = ((head_date - from).num_days() / WINDOW_DAYS + 1).max(1) as u64;
    let progress = ProgressBar::new(total_windows);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template"),
    );
    progress.set_message("syncing windows");

    let mut window_start = from;
    while window_start < head_date {
        let window_end = window_start + Duration::days(WINDOW_DAYS);
        let mut raws = collect_window(&repo, &default_branch, window_start, window_end)?;
        // Mirror upstream ordering: windows advance forward, commits within
        // a window are fed newest-first.
        raws.reverse();
        controller.run_window(raws, &enricher)?;
        window_start = window_end;
        progress.inc(1);
    }
    progress.finish_and_clear();

    controller.flush_pack()?;
    if resync {
        controller.reconcile_orphans()?;
    }
    controller.persist_last_sync()?;

    let outcome = controller.outcome;
    info!(
        "{} done: {} commits seen, {} created, {} updated, {} skipped, {} orphaned",
        config.url,
        outcome.commits,
        outcome.created,
        outcome.updated,
        outcome.skipped,
        outcome.orphaned
    );
    Ok(outcome)
}

/// Parse all commits of one date window from `git log`.
fn collect_window(
    repo: &GitRepo,
    default_branch: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<RawCommit>> {
    let (mut child, reader) = repo.log_stream(Some(since), Some(until))?;
    let parser = LogParser::new(reader, default_branch);
    let mut commits = Vec::new();
    for commit in parser {
        commits.push(commit.map_err(|e| {
            let context = e.context().join("\n");
            if context.is_empty() {
                anyhow::anyhow!(e)
            } else {
                anyhow::anyhow!(e).context(format!("recent log lines:\n{context}"))
            }
        })?);
    }
    let status = child.wait().context("waiting for git log")?;
    if !status.success() {
        anyhow::bail!("git log exited with {status}");
    }
    Ok(commits)
}

struct Controller<'a> {
    config: &'a Config,
    store: &'a dyn ObjectStore,
    publisher: &'a dyn Publisher,
    cache: CommitCache<'a>,
    head_sha: String,
    first_commit_at: DateTime<Utc>,
    commit_count: i64,
    watermark: Option<DateTime<Utc>>,
    seen_shas: FxHashSet<String>,
    outcome: SyncOutcome,
    pack: Vec<EnrichedCommit>,
}

impl<'a> Controller<'a> {
    /// Enrich one window across the worker pool and absorb the results.
    ///
    /// Workers own only the commit they process and share the enricher
    /// read-only; all cache and publish mutation stays on this thread.
    fn run_window(&mut self, raws: Vec<RawCommit>, enricher: &Enricher) -> Result<()> {
        if raws.is_empty() {
            return Ok(());
        }
        let workers = self.config.workers;
        if workers <= 1 {
            for raw in &raws {
                match enricher.enrich(raw) {
                    Ok(enriched) => self.absorb(enriched)?,
                    Err(e) => warn!("skipping commit: {e:#}"),
                }
            }
            return Ok(());
        }

        thread::scope(|scope| -> Result<()> {
            let (task_tx, task_rx) = bounded::<RawCommit>(workers * 2);
            let (done_tx, done_rx) = bounded::<Result<EnrichedCommit>>(workers * 2);
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for raw in task_rx {
                        if done_tx.send(enricher.enrich(&raw)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(done_tx);
            scope.spawn(move || {
                for raw in raws {
                    if task_tx.send(raw).is_err() {
                        break;
                    }
                }
            });
            for result in done_rx {
                match result {
                    Ok(enriched) => self.absorb(enriched)?,
                    Err(e) => warn!("skipping commit: {e:#}"),
                }
            }
            Ok(())
        })
    }

    fn absorb(&mut self, mut enriched: EnrichedCommit) -> Result<()> {
        enriched.payload.is_parent_commit = self.seen_shas.insert(enriched.payload.sha.clone());
        self.outcome.commits += 1;
        self.pack.push(enriched);
        if self.pack.len() >= PACK_SIZE {
            self.flush_pack()?;
        }
        Ok(())
    }

    /// Deduplicate, publish, and persist one pack.
    ///
    /// No cache mutation happens for a batch until its publish returns; a
    /// publish failure aborts the run with the cache untouched.
    fn flush_pack(&mut self) -> Result<()> {
        if self.pack.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        for enriched in &self.pack {
            let created_on = enriched.payload.authored_utc();
            if created_on < now && self.watermark.map_or(true, |w| created_on > w) {
                self.watermark = Some(created_on);
            }
        }

        let mut created_events: Vec<Value> = Vec::new();
        let mut created_entries: Vec<CacheEntry> = Vec::new();
        let mut updated_events: Vec<Value> = Vec::new();
        let mut updated_entries: Vec<CacheEntry> = Vec::new();
        for enriched in std::mem::take(&mut self.pack) {
            let payload = enriched.payload;
            let hash = dedup::content_hash(&payload)?;
            match self.cache.classify(&hash, &payload.id) {
                CacheDecision::Skip => self.outcome.skipped += 1,
                CacheDecision::Create => {
                    created_entries.push(cache_entry(&payload, &hash)?);
                    created_events.push(serde_json::to_value(publish::envelope(
                        EventAction::Created,
                        &self.config.repository_source,
                        payload,
                    ))?);
                }
                CacheDecision::Update => {
                    updated_entries.push(cache_entry(&payload, &hash)?);
                    updated_events.push(serde_json::to_value(publish::envelope(
                        EventAction::Updated,
                        &self.config.repository_source,
                        payload,
                    ))?);
                }
            }
        }

        if !created_events.is_empty() {
            let path = self.publish(EventAction::Created, &created_events)?;
            self.cache.persist_created(created_entries, &path)?;
            self.outcome.created += created_events.len();
        }
        if !updated_events.is_empty() {
            let path = self.publish(EventAction::Updated, &updated_events)?;
            self.cache.persist_updated(updated_entries, &path)?;
            self.outcome.updated += updated_events.len();
        }

        self.persist_last_sync()?;
        let report = ReportData {
            url: self.config.url.clone(),
            new_commits: (created_events.len() + updated_events.len()) as i64,
            date: now.timestamp_nanos_opt().unwrap_or_default(),
            ..Default::default()
        };
        report::write_report(self.store, &self.config.endpoint, &report)
    }

    fn publish(&self, action: EventAction, events: &[Value]) -> Result<String> {
        self.publisher.publish(
            action,
            "insights",
            "git",
            "commits",
            &self.config.stage,
            events,
            &self.config.endpoint,
        )
    }

    /// Republish cache entries still flagged as orphaned after the run.
    ///
    /// Cold repositories reconcile the resident cache directly. Hot
    /// repositories walk every year-half shard from the repository's first
    /// commit through the current cursor, loading and reconciling each in
    /// turn, so shards the run never revisited are not skipped.
    fn reconcile_orphans(&mut self) -> Result<()> {
        if !self.cache.is_hot() {
            return self.reconcile_resident();
        }
        // persist the resident shard's cleared flags before rereading
        self.cache.flush()?;
        let span = cache::shard_span(
            (self.first_commit_at.year(), YearHalf::First),
            self.cache.shard_cursor(),
        );
        if span.is_empty() {
            return self.reconcile_resident();
        }
        for (year, half) in span {
            self.cache.seek_shard(year, half)?;
            self.reconcile_resident()?;
        }
        Ok(())
    }

    /// Reconcile the shard (or cold cache) currently resident in memory.
    ///
    /// Orphaned entries' retained payloads are decoded, re-emitted as
    /// `commit.updated` with `orphaned = true`, and the cache rows are
    /// restamped with the new location. Entries without retained content
    /// (hot shards drop it) are logged and skipped.
    fn reconcile_resident(&mut self) -> Result<()> {
        let mut events: Vec<Value> = Vec::new();
        let mut hashes: Vec<String> = Vec::new();
        for entry in self.cache.orphaned_entries() {
            if entry.content.is_empty() {
                warn!(
                    "orphaned entry {} has no retained payload, skipping republish",
                    entry.source_entity_id
                );
                continue;
            }
            let bytes = match BASE64.decode(entry.content.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("cannot decode orphaned payload {}: {e}", entry.source_entity_id);
                    continue;
                }
            };
            let mut payload: CommitPayload = match serde_json::from_slice(&bytes) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("cannot parse orphaned payload {}: {e}", entry.source_entity_id);
                    continue;
                }
            };
            payload.orphaned = true;
            events.push(serde_json::to_value(publish::envelope(
                EventAction::Updated,
                &self.config.repository_source,
                payload,
            ))?);
            hashes.push(entry.hash);
        }
        if events.is_empty() {
            return Ok(());
        }
        let path = self.publish(EventAction::Updated, &events)?;
        for hash in &hashes {
            self.cache.mark_orphan_republished(hash, &path);
        }
        self.cache.flush()?;
        self.outcome.orphaned += events.len();
        info!("republished {} orphaned commits", events.len());
        Ok(())
    }

    /// Persist the watermark; skipped while no commit has been seen.
    fn persist_last_sync(&self) -> Result<()> {
        let watermark = match self.watermark {
            Some(watermark) => watermark,
            None => return Ok(()),
        };
        let last_sync = LastSync {
            last_sync: watermark,
            target: self.commit_count,
            total: self.cache.created_total() as i64,
            head: self.head_sha.clone(),
            first_commit_at: self.first_commit_at,
        };
        self.cache.set_last_sync(&last_sync)
    }
}

fn cache_entry(payload: &CommitPayload, hash: &str) -> Result<CacheEntry> {
    let content = BASE64.encode(serde_json::to_vec(payload)?);
    Ok(CacheEntry {
        timestamp: payload.sync_timestamp.timestamp().to_string(),
        entity_id: payload.id.clone(),
        source_entity_id: payload.sha.clone(),
        file_location: String::new(),
        hash: hash.to_string(),
        orphaned: false,
        from_dl: false,
        content,
        commit_date: Some(payload.committed_timestamp),
    })
}

