//! Progress reports and job status
//!
//! After each pack flush a small report record is written to the store, and
//! the job status record tracks the run lifecycle
//! (`in_progress` / `failed` / `done`).

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::CONNECTOR;
use crate::store::ObjectStore;

/// Per-flush progress record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_name: String,
    pub url: String,
    pub new_commits: i64,
    pub date: i64,
    #[serde(default)]
    pub sync_status: String,
    #[serde(default)]
    pub orphaned_commits: i64,
}

/// Write one progress report, keyed by endpoint and timestamp.
pub fn write_report(store: &dyn ObjectStore, endpoint: &str, report: &ReportData) -> Result<()> {
    let key = format!("{}-{}.json", endpoint, Utc::now().timestamp());
    store.put("reports", &key, &serde_json::to_vec(report)?)
}

/// Run lifecycle states surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Failed,
    Done,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    connector: String,
    endpoint: String,
    status: JobStatus,
    message: String,
    created_at: i64,
}

/// Structured job status log for one endpoint.
pub struct JobLog<'a> {
    store: &'a dyn ObjectStore,
    endpoint: String,
}

impl<'a> JobLog<'a> {
    pub fn new(store: &'a dyn ObjectStore, endpoint: impl Into<String>) -> Self {
        Self {
            store,
            endpoint: endpoint.into(),
        }
    }

    pub fn write(&self, status: JobStatus, message: &str) -> Result<()> {
        let record = JobRecord {
            connector: CONNECTOR.to_string(),
            endpoint: self.endpoint.clone(),
            status,
            message: message.to_string(),
            created_at: Utc::now().timestamp(),
        };
        self.store
            .put(&self.endpoint, "job-log.json", &serde_json::to_vec(&record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsStore;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(serde_json::to_string(&JobStatus::Done).unwrap(), "\"done\"");
    }

    #[test]
    fn job_log_overwrites_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let log = JobLog::new(&store, "ep");
        log.write(JobStatus::InProgress, "").unwrap();
        log.write(JobStatus::Failed, "boom").unwrap();
        let bytes = store.get("ep", "job-log.json").unwrap().unwrap();
        let record: JobRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.message, "boom");
    }

    #[test]
    fn report_written_under_reports_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let report = ReportData {
            url: "https://example.org/repo".into(),
            new_commits: 5,
            date: 1700000000,
            ..Default::default()
        };
        write_report(&store, "ep", &report).unwrap();
        let keys = crate::store::list_keys(dir.path(), "reports");
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("ep-"));
    }
}
