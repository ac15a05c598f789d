//! Object-store seam
//!
//! The cache CSVs, last-sync records, and report files live in an external
//! object store in production. The engine only depends on this trait; the
//! filesystem implementation below is used locally and in tests.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Keyed byte storage scoped by endpoint.
pub trait ObjectStore: Send + Sync {
    /// Fetch a file; `None` when the key does not exist.
    fn get(&self, endpoint: &str, key: &str) -> Result<Option<Vec<u8>>>;
    /// Create or replace a file.
    fn put(&self, endpoint: &str, key: &str, data: &[u8]) -> Result<()>;

    fn get_last_sync(&self, endpoint: &str) -> Result<Option<Vec<u8>>> {
        self.get(endpoint, LAST_SYNC_KEY)
    }
    fn set_last_sync(&self, endpoint: &str, data: &[u8]) -> Result<()> {
        self.put(endpoint, LAST_SYNC_KEY, data)
    }
}

const LAST_SYNC_KEY: &str = "last-sync.json";

/// Filesystem-backed object store rooted at a directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_path(&self, endpoint: &str, key: &str) -> PathBuf {
        self.root.join(safe_component(endpoint)).join(safe_component(key))
    }
}

impl ObjectStore for FsStore {
    fn get(&self, endpoint: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.file_path(endpoint, key);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    fn put(&self, endpoint: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.file_path(endpoint, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        std::fs::write(&path, data).with_context(|| format!("cannot write {}", path.display()))
    }
}

/// Collapse a key into a single path component.
fn safe_component(key: &str) -> String {
    key.replace(['/', '\\'], "-")
}

/// List keys currently stored for an endpoint (test helper).
pub fn list_keys(root: &Path, endpoint: &str) -> Vec<String> {
    let dir = root.join(safe_component(endpoint));
    let mut keys: Vec<String> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.get("ep", "a.csv").unwrap().is_none());
        store.put("ep", "a.csv", b"hello").unwrap();
        assert_eq!(store.get("ep", "a.csv").unwrap().unwrap(), b"hello");
    }

    #[test]
    fn last_sync_uses_fixed_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.set_last_sync("ep", b"{}").unwrap();
        assert_eq!(store.get("ep", "last-sync.json").unwrap().unwrap(), b"{}");
    }

    #[test]
    fn keys_are_flattened_to_one_component() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.put("a/b", "c/d.csv", b"x").unwrap();
        assert_eq!(list_keys(dir.path(), "a/b"), vec!["c-d.csv"]);
    }
}
