//! Commit cache store
//!
//! Persists one CSV row per published commit, keyed by the payload content
//! hash, in the object store. Cold repositories use a single
//! `commits-cache.csv` holding the full base64 payload; hot repositories
//! (>= 50,000 commits) are sharded into year-half files that omit payload
//! content, with only the active shard held in memory. A secondary
//! `commits-update-cache.csv` mirrors entries that were updated rather than
//! created.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::models::LastSync;
use crate::store::ObjectStore;

pub const CACHE_FILE: &str = "commits-cache.csv";
pub const UPDATE_CACHE_FILE: &str = "commits-update-cache.csv";
const HEADER: [&str; 8] = [
    "timestamp",
    "entity_id",
    "source_entity_id",
    "file_location",
    "hash",
    "orphaned",
    "from_dl",
    "content",
];

/// One cached commit row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub timestamp: String,
    pub entity_id: String,
    pub source_entity_id: String,
    pub file_location: String,
    pub hash: String,
    pub orphaned: bool,
    pub from_dl: bool,
    pub content: String,
    /// Carried in memory for shard routing; not a CSV column.
    pub commit_date: Option<DateTime<FixedOffset>>,
}

/// Year half used for hot-repository shard names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearHalf {
    First,
    Second,
}

impl YearHalf {
    pub fn of(date: DateTime<FixedOffset>) -> Self {
        if date.month() > 6 {
            YearHalf::Second
        } else {
            YearHalf::First
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            YearHalf::First => "first-half",
            YearHalf::Second => "second-half",
        }
    }
}

/// Shard file name for a (year, half) cursor.
pub fn shard_file(year: i32, half: YearHalf) -> String {
    format!("commits-cache-{}-{}.csv", year, half.as_str())
}

/// Every (year, half) position from `first` through `last`, inclusive.
/// Empty when `first` lies after `last`.
pub fn shard_span(first: (i32, YearHalf), last: (i32, YearHalf)) -> Vec<(i32, YearHalf)> {
    fn index(cursor: (i32, YearHalf)) -> i32 {
        cursor.0 * 2 + matches!(cursor.1, YearHalf::Second) as i32
    }
    (index(first)..=index(last))
        .map(|i| {
            let half = if i.rem_euclid(2) == 1 {
                YearHalf::Second
            } else {
                YearHalf::First
            };
            (i.div_euclid(2), half)
        })
        .collect()
}

/// What to do with an enriched commit, per the dedup decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Never seen: emit `commit.created`.
    Create,
    /// Known entity with a changed fingerprint: emit `commit.updated`.
    Update,
    /// Fingerprint already cached: nothing to publish.
    Skip,
}

/// In-memory view of the commit cache for one run.
pub struct CommitCache<'a> {
    store: &'a dyn ObjectStore,
    endpoint: String,
    hot: bool,
    resync: bool,
    entries: FxHashMap<String, CacheEntry>,
    updates: FxHashMap<String, CacheEntry>,
    created: FxHashSet<String>,
    year: i32,
    half: YearHalf,
}

impl<'a> CommitCache<'a> {
    pub fn new(store: &'a dyn ObjectStore, endpoint: impl Into<String>, hot: bool) -> Self {
        Self {
            store,
            endpoint: endpoint.into(),
            hot,
            resync: false,
            entries: FxHashMap::default(),
            updates: FxHashMap::default(),
            created: FxHashSet::default(),
            year: 1970,
            half: YearHalf::First,
        }
    }

    pub fn is_hot(&self) -> bool {
        self.hot
    }

    /// The (year, half) shard currently resident in memory.
    pub fn shard_cursor(&self) -> (i32, YearHalf) {
        (self.year, self.half)
    }

    /// Number of distinct entity ids ever created for this endpoint.
    pub fn created_total(&self) -> usize {
        self.created.len()
    }

    /// Load the cache for a run.
    ///
    /// `resync` (a non-empty LAST_SYNC) forces every loaded entry to
    /// `orphaned = true`; the run clears the flag for each commit it
    /// re-emits, leaving the truly orphaned ones marked. For hot
    /// repositories the shard cursor starts at the window start date.
    pub fn load(&mut self, resync: bool, window_start: DateTime<Utc>) -> Result<()> {
        self.resync = resync;
        if self.hot {
            let start = window_start.fixed_offset();
            self.year = start.year();
            self.half = YearHalf::of(start);
            self.load_shard(resync)?;
            self.load_updates(resync)?;
        } else {
            self.load_file(CACHE_FILE, resync, false)?;
        }
        debug!(
            "loaded {} cache entries, {} update entries, {} created ids",
            self.entries.len(),
            self.updates.len(),
            self.created.len()
        );
        Ok(())
    }

    fn load_shard(&mut self, resync: bool) -> Result<()> {
        self.entries.clear();
        let file = shard_file(self.year, self.half);
        self.load_file(&file, resync, false)
    }

    /// Point the cursor at a specific shard and load its persisted state,
    /// flags as stored (no resync forcing). Used by orphan reconciliation
    /// to revisit shards the run has already moved past.
    pub fn seek_shard(&mut self, year: i32, half: YearHalf) -> Result<()> {
        self.year = year;
        self.half = half;
        self.load_shard(false)
    }

    fn load_updates(&mut self, resync: bool) -> Result<()> {
        self.load_file(UPDATE_CACHE_FILE, resync, true)
    }

    fn load_file(&mut self, key: &str, resync: bool, into_updates: bool) -> Result<()> {
        let bytes = match self.store.get(&self.endpoint, key)? {
            Some(bytes) => bytes,
            None => return Ok(()),
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes.as_slice());
        for record in reader.records() {
            let record = record.with_context(|| format!("malformed cache csv {key}"))?;
            let field = |i: usize| record.get(i).unwrap_or_default().to_string();
            let mut orphaned = record
                .get(5)
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(false);
            if resync {
                orphaned = true;
            }
            let entry = CacheEntry {
                timestamp: field(0),
                entity_id: field(1),
                source_entity_id: field(2),
                file_location: field(3),
                hash: field(4),
                orphaned,
                from_dl: record
                    .get(6)
                    .and_then(|v| v.parse::<bool>().ok())
                    .unwrap_or(false),
                content: field(7),
                commit_date: None,
            };
            self.created.insert(entry.entity_id.clone());
            let target = if into_updates {
                &mut self.updates
            } else {
                &mut self.entries
            };
            target.insert(entry.hash.clone(), entry);
        }
        Ok(())
    }

    /// Classify an enriched commit against the cache.
    ///
    /// A fingerprint hit also clears the entry's pending-orphan flag set at
    /// load time.
    pub fn classify(&mut self, hash: &str, entity_id: &str) -> CacheDecision {
        if let Some(entry) = self.entries.get_mut(hash) {
            entry.orphaned = false;
            return CacheDecision::Skip;
        }
        if self.created.contains(entity_id) {
            CacheDecision::Update
        } else {
            CacheDecision::Create
        }
    }

    /// Record and persist freshly created commits after a successful publish.
    pub fn persist_created(&mut self, mut batch: Vec<CacheEntry>, path: &str) -> Result<()> {
        for entry in &mut batch {
            entry.file_location = path.to_string();
            self.created.insert(entry.entity_id.clone());
        }
        if self.hot {
            self.persist_sharded(batch)
        } else {
            for entry in batch {
                self.entries.insert(entry.hash.clone(), entry);
            }
            self.write_file(CACHE_FILE, &self.entries)
        }
    }

    /// Record and persist updated commits after a successful publish.
    ///
    /// Cold repositories fold updates into the main cache file; hot ones
    /// keep them in the update cache.
    pub fn persist_updated(&mut self, mut batch: Vec<CacheEntry>, path: &str) -> Result<()> {
        for entry in &mut batch {
            entry.file_location = path.to_string();
            self.created.insert(entry.entity_id.clone());
        }
        if self.hot {
            for entry in &mut batch {
                entry.content.clear();
            }
            for entry in batch {
                self.updates.insert(entry.hash.clone(), entry);
            }
            self.write_file(UPDATE_CACHE_FILE, &self.updates)
        } else {
            for entry in batch {
                self.entries.insert(entry.hash.clone(), entry);
            }
            self.write_file(CACHE_FILE, &self.entries)
        }
    }

    /// Route a hot-repository batch into year-half shards, flushing and
    /// advancing the cursor whenever the batch crosses a shard boundary.
    fn persist_sharded(&mut self, batch: Vec<CacheEntry>) -> Result<()> {
        let mut rest = batch;
        loop {
            let mut next: Vec<CacheEntry> = Vec::new();
            for mut entry in rest {
                entry.content.clear();
                let date = match entry.commit_date {
                    Some(date) => date,
                    None => {
                        self.entries.insert(entry.hash.clone(), entry);
                        continue;
                    }
                };
                if date.year() == self.year && YearHalf::of(date) == self.half {
                    self.entries.insert(entry.hash.clone(), entry);
                } else {
                    next.push(entry);
                }
            }
            self.write_file(&shard_file(self.year, self.half), &self.entries)?;
            if next.is_empty() {
                return Ok(());
            }
            // advance the cursor to the next batch's shard and load it; a
            // resync run keeps forcing the pending-orphan flag so commits
            // this run never re-emits stay marked
            let date = next[0].commit_date.expect("routed entries carry dates");
            self.year = date.year();
            self.half = YearHalf::of(date);
            self.load_shard(self.resync)?;
            rest = next;
        }
    }

    /// Entries still flagged as orphaned (not re-emitted this run).
    pub fn orphaned_entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self
            .entries
            .values()
            .filter(|e| e.orphaned)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        entries
    }

    /// Stamp a reconciled orphan with its republished location and drop the
    /// retained payload.
    pub fn mark_orphan_republished(&mut self, hash: &str, path: &str) {
        if let Some(entry) = self.entries.get_mut(hash) {
            entry.from_dl = false;
            entry.file_location = path.to_string();
            entry.content.clear();
        }
    }

    /// Persist the current in-memory state (main file or active shard, plus
    /// the update cache when present).
    pub fn flush(&mut self) -> Result<()> {
        if self.hot {
            self.write_file(&shard_file(self.year, self.half), &self.entries)?;
        } else {
            self.write_file(CACHE_FILE, &self.entries)?;
        }
        if !self.updates.is_empty() {
            self.write_file(UPDATE_CACHE_FILE, &self.updates)?;
        }
        Ok(())
    }

    fn write_file(&self, key: &str, entries: &FxHashMap<String, CacheEntry>) -> Result<()> {
        let mut rows: Vec<&CacheEntry> = entries.values().collect();
        rows.sort_by(|a, b| a.hash.cmp(&b.hash));
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(HEADER)?;
        for e in rows {
            writer.write_record([
                e.timestamp.as_str(),
                e.entity_id.as_str(),
                e.source_entity_id.as_str(),
                e.file_location.as_str(),
                e.hash.as_str(),
                if e.orphaned { "true" } else { "false" },
                if e.from_dl { "true" } else { "false" },
                e.content.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("cannot finalize cache csv: {e}"))?;
        self.store.put(&self.endpoint, key, &bytes)
    }

    /// Persisted last-sync record for this endpoint.
    ///
    /// Falls back to the legacy format, a bare RFC 3339 timestamp.
    pub fn last_sync(&self) -> Result<Option<LastSync>> {
        let bytes = match self.store.get_last_sync(&self.endpoint)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        if let Ok(ls) = serde_json::from_slice::<LastSync>(&bytes) {
            return Ok(Some(ls));
        }
        let legacy: DateTime<Utc> =
            serde_json::from_slice(&bytes).context("unreadable last-sync record")?;
        Ok(Some(LastSync {
            last_sync: legacy,
            ..Default::default()
        }))
    }

    pub fn set_last_sync(&self, last_sync: &LastSync) -> Result<()> {
        let bytes = serde_json::to_vec(last_sync)?;
        self.store.set_last_sync(&self.endpoint, &bytes)
    }
}
