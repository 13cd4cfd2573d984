use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{TriageFields, WorkflowRecord, WorkflowStore};
use crate::error::{AppError, Result};
use crate::parse::phase::ImplementationPhase;

type Records = BTreeMap<String, WorkflowRecord>;

/// JSON-file backed store: one object keyed by issue number.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash never leaves a truncated store behind.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Records> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Records::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                AppError::Store(format!("Corrupt store {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Records::new()),
            Err(e) => Err(AppError::Store(format!(
                "Failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, records: &Records) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Store(format!("Failed to create store dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AppError::Store(format!("Failed to write store: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::Store(format!("Failed to replace store: {e}")))?;
        Ok(())
    }

    async fn update<F>(&self, issue_number: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowRecord) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let record = records
            .entry(issue_number.to_string())
            .or_insert_with(|| WorkflowRecord {
                issue_number,
                ..Default::default()
            });
        f(record);
        record.updated_at = Some(chrono::Utc::now());
        self.save(&records).await
    }
}

#[async_trait]
impl WorkflowStore for FileStore {
    async fn get(&self, issue_number: u64) -> Result<Option<WorkflowRecord>> {
        Ok(self.load().await?.remove(&issue_number.to_string()))
    }

    async fn save_phases(&self, issue_number: u64, phases: &[ImplementationPhase]) -> Result<()> {
        let phases = phases.to_vec();
        self.update(issue_number, move |r| r.phases = Some(phases)).await
    }

    async fn clear_phases(&self, issue_number: u64) -> Result<()> {
        let known = self
            .get(issue_number)
            .await?
            .is_some_and(|r| r.phases.is_some());
        if !known {
            return Ok(());
        }
        self.update(issue_number, |r| r.phases = None).await
    }

    async fn update_triage(&self, issue_number: u64, triage: &TriageFields) -> Result<()> {
        let triage = triage.clone();
        self.update(issue_number, move |r| {
            // Only overwrite the fields the triage run produced.
            if triage.domain.is_some() {
                r.triage.domain = triage.domain;
            }
            if triage.priority.is_some() {
                r.triage.priority = triage.priority;
            }
            if triage.size.is_some() {
                r.triage.size = triage.size;
            }
            if triage.complexity.is_some() {
                r.triage.complexity = triage.complexity;
            }
        })
        .await
    }

    async fn mark_workflow_reviewed(&self, issue_number: u64, summary: &str) -> Result<()> {
        let summary = summary.to_string();
        self.update(issue_number, move |r| {
            r.workflow_reviewed = true;
            r.workflow_review_summary = Some(summary);
        })
        .await
    }
}
