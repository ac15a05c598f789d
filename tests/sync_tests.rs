//! End-to-end sync tests
//!
//! Each test builds a real repository in a temp directory, clones and syncs
//! it through the full pipeline with the filesystem store and publisher,
//! and asserts on the published events and cache files.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use gitingest::config::Config;
use gitingest::publish::FsPublisher;
use gitingest::store::{self, FsStore};
use gitingest::sync;

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LANG", "C")
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

fn commit_with(dir: &Path, message: &str, date: &str, author: (&str, &str)) {
    let out = Command::new("git")
        .args(["commit", "--allow-empty-message", "-m", message])
        .current_dir(dir)
        .env("LANG", "C")
        .env("GIT_AUTHOR_NAME", author.0)
        .env("GIT_AUTHOR_EMAIL", author.1)
        .env("GIT_COMMITTER_NAME", author.0)
        .env("GIT_COMMITTER_EMAIL", author.1)
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .output()
        .expect("failed to run git commit");
    assert!(
        out.status.success(),
        "git commit failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

/// A sync workspace: upstream repo, clone area, cache/state/event roots.
struct Workspace {
    _root: TempDir,
    upstream: PathBuf,
    config: Config,
    state_root: PathBuf,
    events_root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        let upstream = root.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "-b", "main"]);

        let url = upstream.to_string_lossy().into_owned();
        let config = Config {
            repo_name: gitingest::config::repo_name(&url),
            endpoint: gitingest::config::endpoint_key(&url),
            url,
            repos_path: root.path().join("repos").to_string_lossy().into_owned(),
            cache_path: root.path().join("cache").to_string_lossy().into_owned(),
            skip_cache_cleanup: false,
            stream: "test-stream".into(),
            source_id: String::new(),
            repository_source: "git".into(),
            workers: 1,
            stage: "test".into(),
            last_sync_env: None,
            gitops_fatal: false,
            orphans_fatal: false,
            pair_programming: true,
        };
        Self {
            state_root: root.path().join("state"),
            events_root: root.path().join("events"),
            _root: root,
            upstream,
            config,
        }
    }

    fn sync(&self) -> anyhow::Result<sync::SyncOutcome> {
        let store = FsStore::new(&self.state_root);
        let publisher = FsPublisher::new(&self.events_root);
        sync::run(&self.config, &store, &publisher, None)
    }

    /// All payloads published under an event action, across batches.
    fn published(&self, action: &str) -> Vec<serde_json::Value> {
        let dir = self
            .events_root
            .join(self.config.endpoint.replace(['/', '\\'], "-"));
        let mut payloads = Vec::new();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return payloads;
        };
        let mut files: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        files.sort();
        for file in files {
            let name = file.file_name().unwrap().to_string_lossy().into_owned();
            if !name.starts_with(action) {
                continue;
            }
            let text = std::fs::read_to_string(&file).unwrap();
            let batch: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
            payloads.extend(batch);
        }
        payloads
    }

    fn state_keys(&self) -> Vec<String> {
        store::list_keys(&self.state_root, &self.config.endpoint)
    }
}

#[test]
fn single_author_doc_commit_end_to_end() {
    let ws = Workspace::new();
    std::fs::write(ws.upstream.join("README.md"), "hello\nworld\n").unwrap();
    git(&ws.upstream, &["add", "."]);
    commit_with(
        &ws.upstream,
        "init\n\nSigned-off-by: Alice <a@x.example>",
        "2023-02-01 10:00:00 +0000",
        ("Alice", "a@x.example"),
    );

    let outcome = ws.sync().expect("sync");
    assert_eq!(outcome.created, 1);
    assert_eq!(outcome.updated, 0);

    let events = ws.published("commit.created");
    assert_eq!(events.len(), 1);
    let ev = &events[0];
    assert_eq!(ev["type"], "commit.created");
    assert_eq!(ev["connector"], "git-connector");

    let payload = &ev["payload"];
    assert_eq!(payload["doc_commit"], true);
    assert_eq!(payload["merge_commit"], false);
    assert_eq!(payload["branch"], "main");
    assert_eq!(payload["default_branch"], true);

    let files = payload["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["type"], "md");
    assert_eq!(files[0]["files_created"], 1);
    assert_eq!(files[0]["lines_added"], 2);

    let contributors = payload["contributors"].as_array().unwrap();
    let roles: Vec<&str> = contributors
        .iter()
        .map(|c| c["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["author", "committer", "signer"]);
    for c in contributors {
        assert_eq!(c["weight"], 1.0);
        assert_eq!(c["identity"]["email"], "a@x.example");
    }

    // supplemental enrichment fields reach the published payload
    assert_eq!(payload["repo_short_name"], "upstream");
    assert_eq!(payload["time_to_commit_hours"], 0.0);
    assert_eq!(payload["is_parent_commit"], true);
    assert_eq!(payload["commit_tags"].as_array().unwrap().len(), 0);
    assert!(payload.get("github_repo").is_none());
}

#[test]
fn rerun_with_unchanged_history_is_idempotent() {
    let ws = Workspace::new();
    for i in 0..3 {
        std::fs::write(ws.upstream.join(format!("f{i}.c")), format!("int f{i};\n")).unwrap();
        git(&ws.upstream, &["add", "."]);
        commit_with(
            &ws.upstream,
            &format!("commit {i}"),
            &format!("2023-02-0{} 10:00:00 +0000", i + 1),
            ("Alice", "a@x.example"),
        );
    }

    let first = ws.sync().expect("first sync");
    assert_eq!(first.created, 3);
    assert_eq!(first.updated, 0);

    let second = ws.sync().expect("second sync");
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);

    // event ids are unique within the run
    let events = ws.published("commit.created");
    let mut ids: Vec<&str> = events
        .iter()
        .map(|e| e["payload"]["id"].as_str().unwrap())
        .collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
}

#[test]
fn cache_and_last_sync_files_are_persisted() {
    let ws = Workspace::new();
    std::fs::write(ws.upstream.join("a.c"), "int a;\n").unwrap();
    git(&ws.upstream, &["add", "."]);
    commit_with(
        &ws.upstream,
        "one",
        "2023-03-01 10:00:00 +0000",
        ("Alice", "a@x.example"),
    );

    ws.sync().expect("sync");
    let keys = ws.state_keys();
    assert!(keys.contains(&"commits-cache.csv".to_string()), "{keys:?}");
    assert!(keys.contains(&"last-sync.json".to_string()), "{keys:?}");

    let store = FsStore::new(&ws.state_root);
    use gitingest::store::ObjectStore;
    let csv = store
        .get(&ws.config.endpoint, "commits-cache.csv")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(csv).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        "timestamp,entity_id,source_entity_id,file_location,hash,orphaned,from_dl,content"
    );
    assert_eq!(lines.count(), 1);

    let last_sync = store.get_last_sync(&ws.config.endpoint).unwrap().unwrap();
    let ls: serde_json::Value = serde_json::from_slice(&last_sync).unwrap();
    assert_eq!(ls["head"].as_str().unwrap().len(), 40);
    assert_eq!(ls["target"], 1);
    assert_eq!(ls["total"], 1);
}

#[test]
fn pair_programming_authors_share_weight() {
    let ws = Workspace::new();
    std::fs::write(ws.upstream.join("pair.c"), "int pair;\n").unwrap();
    git(&ws.upstream, &["add", "."]);
    commit_with(
        &ws.upstream,
        "pairing",
        "2023-04-01 10:00:00 +0000",
        ("Ann Alpha and Bob Beta", "b@x.example"),
    );

    ws.sync().expect("sync");
    let events = ws.published("commit.created");
    let contributors = events[0]["payload"]["contributors"].as_array().unwrap();
    let authors: Vec<&serde_json::Value> = contributors
        .iter()
        .filter(|c| c["role"] == "author")
        .collect();
    assert_eq!(authors.len(), 2);
    let weight_sum: f64 = authors.iter().map(|a| a["weight"].as_f64().unwrap()).sum();
    assert!((weight_sum - 1.0).abs() < f64::EPSILON);
}

#[test]
fn rewritten_history_republishes_orphans() {
    let ws = Workspace::new();
    std::fs::write(ws.upstream.join("keep.c"), "int keep;\n").unwrap();
    git(&ws.upstream, &["add", "."]);
    commit_with(
        &ws.upstream,
        "keep",
        "2023-05-01 10:00:00 +0000",
        ("Alice", "a@x.example"),
    );
    std::fs::write(ws.upstream.join("drop.c"), "int drop;\n").unwrap();
    git(&ws.upstream, &["add", "."]);
    commit_with(
        &ws.upstream,
        "will be dropped",
        "2023-05-02 10:00:00 +0000",
        ("Alice", "a@x.example"),
    );

    let first = ws.sync().expect("first sync");
    assert_eq!(first.created, 2);

    // rewrite upstream history: drop the newest commit
    git(&ws.upstream, &["reset", "--hard", "HEAD~1"]);

    // resync mode: pretend the platform passed LAST_SYNC
    let mut config = ws.config.clone();
    config.last_sync_env = Some("2023-04-30T00:00:00Z".parse().unwrap());
    let store = FsStore::new(&ws.state_root);
    let publisher = FsPublisher::new(&ws.events_root);
    let outcome = sync::run(&config, &store, &publisher, None).expect("resync");

    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.orphaned, 1);

    let updated = ws.published("commit.updated");
    assert_eq!(updated.len(), 1);
    let payload = &updated[0]["payload"];
    assert_eq!(payload["orphaned"], true);
    assert_eq!(payload["message"], "will be dropped");
}

#[test]
fn merge_commit_flag_for_empty_file_sets() {
    let ws = Workspace::new();
    std::fs::write(ws.upstream.join("base.c"), "int base;\n").unwrap();
    git(&ws.upstream, &["add", "."]);
    commit_with(
        &ws.upstream,
        "base",
        "2023-06-01 10:00:00 +0000",
        ("Alice", "a@x.example"),
    );
    // an empty commit has no file section in the log
    let out = Command::new("git")
        .args(["commit", "--allow-empty", "-m", "nothing changed"])
        .current_dir(&ws.upstream)
        .env("LANG", "C")
        .env("GIT_AUTHOR_NAME", "Alice")
        .env("GIT_AUTHOR_EMAIL", "a@x.example")
        .env("GIT_COMMITTER_NAME", "Alice")
        .env("GIT_COMMITTER_EMAIL", "a@x.example")
        .env("GIT_AUTHOR_DATE", "2023-06-02 10:00:00 +0000")
        .env("GIT_COMMITTER_DATE", "2023-06-02 10:00:00 +0000")
        .output()
        .unwrap();
    assert!(out.status.success());

    ws.sync().expect("sync");
    let events = ws.published("commit.created");
    let empty = events
        .iter()
        .find(|e| e["payload"]["message"] == "nothing changed")
        .expect("empty commit event");
    assert_eq!(empty["payload"]["merge_commit"], true);
    assert_eq!(empty["payload"]["doc_commit"], false);
    assert_eq!(empty["payload"]["files"].as_array().unwrap().len(), 0);
}
