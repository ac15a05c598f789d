//! Event publishing
//!
//! Batches of enveloped commit events go to an external sink through the
//! [`Publisher`] trait; the sink returns the storage path the batch landed
//! at, which the controller stamps onto the batch's cache entries. The real
//! object-store sink lives outside this crate; the filesystem and logging
//! adapters below serve local runs and tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::config::{CONNECTOR, CONNECTOR_VERSION};
use crate::models::{CommitEvent, CommitPayload, EventAction};

/// Downstream event sink.
pub trait Publisher: Send + Sync {
    /// Publish one batch and return the storage path it was written to.
    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        action: EventAction,
        domain: &str,
        source: &str,
        category: &str,
        environment: &str,
        events: &[Value],
        endpoint: &str,
    ) -> Result<String>;
}

/// Wrap a payload in the published event envelope.
pub fn envelope(action: EventAction, source: &str, payload: CommitPayload) -> CommitEvent {
    let now = Utc::now().timestamp();
    CommitEvent {
        event_type: action.as_str().to_string(),
        connector: CONNECTOR.to_string(),
        connector_version: CONNECTOR_VERSION.to_string(),
        source: source.to_string(),
        created_by: CONNECTOR.to_string(),
        updated_by: CONNECTOR.to_string(),
        created_at: now,
        updated_at: now,
        payload,
    }
}

/// Writes each batch as one JSON file under `root/<endpoint>/` and returns
/// its path.
pub struct FsPublisher {
    root: PathBuf,
    seq: AtomicU64,
}

impl FsPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq: AtomicU64::new(0),
        }
    }
}

impl Publisher for FsPublisher {
    fn publish(
        &self,
        action: EventAction,
        _domain: &str,
        _source: &str,
        _category: &str,
        _environment: &str,
        events: &[Value],
        endpoint: &str,
    ) -> Result<String> {
        let dir = self.root.join(endpoint.replace(['/', '\\'], "-"));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        let path = dir.join(format!("{}-{:06}.json", action.as_str(), n));
        let bytes = serde_json::to_vec_pretty(events)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Logs batches instead of storing them; used when no stream is configured.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(
        &self,
        action: EventAction,
        domain: &str,
        source: &str,
        category: &str,
        environment: &str,
        events: &[Value],
        endpoint: &str,
    ) -> Result<String> {
        info!(
            "publish[action={action} domain={domain} source={source} category={category} \
             env={environment} endpoint={endpoint}]: {} events",
            events.len()
        );
        Ok(format!("log://{endpoint}/{action}"))
    }
}
