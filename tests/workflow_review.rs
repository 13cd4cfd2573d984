mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_workflow::error::Result;
use agent_workflow::logging::log_key;
use agent_workflow::logging::store::{LocalLogStore, LogStore};
use agent_workflow::platform::types::{ReviewStatus, Status};
use agent_workflow::store::WorkflowStore;
use agent_workflow::workflow::workflow_review::WORKFLOW_REVIEW_MARKER;
use agent_workflow::workflow::{self, run_batch, BatchOptions, WorkflowName};
use async_trait::async_trait;
use common::{item, Harness, ScriptedAgent};
use serde_json::json;

/// Answers `exists` the way an object store does: without looking.
struct ObjectStoreLike(LocalLogStore);

#[async_trait]
impl LogStore for ObjectStoreLike {
    fn append(&self, key: &str, text: &str) -> Result<()> {
        self.0.append(key, text)
    }

    fn exists(&self, _key: &str) -> bool {
        true
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.0.read(key).await
    }

    async fn write(&self, key: &str, content: &str) -> Result<()> {
        self.0.write(key, content).await
    }

    async fn flush(&self, timeout: Duration) {
        self.0.flush(timeout).await
    }
}

fn reviewer() -> ScriptedAgent {
    ScriptedAgent::new(
        Some(json!({
            "findings": "The implement run retried twice on the same test.",
            "summary": "One flaky test"
        })),
        None,
    )
}

#[tokio::test]
async fn test_done_items_without_logs_are_not_pending_under_remote_logs() {
    let h = Harness::with_log_store(reviewer(), |logs: PathBuf| {
        Arc::new(ObjectStoreLike(LocalLogStore::new(logs))) as Arc<dyn LogStore>
    })
    .await;
    h.project.insert_item(item("PVTI_20", 20, Status::Done, ReviewStatus::Empty));
    h.project.insert_item(item("PVTI_21", 21, Status::Done, ReviewStatus::Empty));
    LocalLogStore::new(h.dir.path().join("logs"))
        .write(&log_key(21), "# Execution log for #21\n\nImplement run failed twice.\n")
        .await
        .unwrap();

    let wf = workflow::for_name(WorkflowName::WorkflowReview);
    let summary = run_batch(&h.state, wf.as_ref(), &BatchOptions::default())
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.agent.calls(), 1);
    assert!(h.project.comments(20).is_empty());

    let comments = h.project.comments(21);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.starts_with(WORKFLOW_REVIEW_MARKER));
    assert!(h.store.get(21).await.unwrap().unwrap().workflow_reviewed);
}

#[tokio::test]
async fn test_reviewed_items_are_not_picked_up_again() {
    let h = Harness::new(reviewer()).await;
    h.project.insert_item(item("PVTI_21", 21, Status::Done, ReviewStatus::Empty));
    LocalLogStore::new(h.dir.path().join("logs"))
        .write(&log_key(21), "# Execution log for #21\n")
        .await
        .unwrap();

    let wf = workflow::for_name(WorkflowName::WorkflowReview);
    run_batch(&h.state, wf.as_ref(), &BatchOptions::default()).await.unwrap();
    let again = run_batch(&h.state, wf.as_ref(), &BatchOptions::default()).await.unwrap();
    h.settle().await;

    assert_eq!(again.processed, 0);
    assert_eq!(h.agent.calls(), 1);
}
