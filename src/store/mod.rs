//! Workflow-item records: the database side of an issue's automation state.
//!
//! Board fields (status, review status, phase string) live on the project
//! board. The record keeps what the board has no field for: the parsed
//! phase list, triage results and workflow-review metadata.

mod file;

pub use file::FileStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parse::phase::ImplementationPhase;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageFields {
    pub domain: Option<String>,
    pub priority: Option<String>,
    pub size: Option<String>,
    pub complexity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub issue_number: u64,
    #[serde(default)]
    pub phases: Option<Vec<ImplementationPhase>>,
    #[serde(default, flatten)]
    pub triage: TriageFields,
    #[serde(default)]
    pub workflow_reviewed: bool,
    #[serde(default)]
    pub workflow_review_summary: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get(&self, issue_number: u64) -> Result<Option<WorkflowRecord>>;

    async fn save_phases(&self, issue_number: u64, phases: &[ImplementationPhase]) -> Result<()>;

    /// Forget a previously recorded phase list. A no-op for unknown issues.
    async fn clear_phases(&self, issue_number: u64) -> Result<()>;

    async fn update_triage(&self, issue_number: u64, triage: &TriageFields) -> Result<()>;

    async fn mark_workflow_reviewed(&self, issue_number: u64, summary: &str) -> Result<()>;
}
