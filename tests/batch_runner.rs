mod common;

use std::sync::{Arc, Barrier};
use std::time::Duration;

use agent_workflow::error::AppError;
use agent_workflow::lock::LockManager;
use agent_workflow::platform::types::{ItemFilter, ReviewStatus, Status};
use agent_workflow::platform::ProjectManager;
use agent_workflow::workflow::bug::INVESTIGATION_MARKER;
use agent_workflow::workflow::{self, run_batch, BatchOptions, BatchSummary, Partition, Workflow, WorkflowName};
use common::{item, Harness, ScriptedAgent};
use serde_json::json;

async fn board() -> Harness {
    let agent = ScriptedAgent::new(
        Some(json!({
            "rootCause": "Cache key ignores the locale",
            "proposedFix": "Include the locale in the key",
            "affectedFiles": ["src/cache.rs"],
            "confidence": "medium"
        })),
        None,
    );
    let h = Harness::new(agent).await;
    let rows = [
        ("PVTI_1", 1, Status::BugInvestigation, ReviewStatus::Empty),
        ("PVTI_2", 2, Status::BugInvestigation, ReviewStatus::RequestChanges),
        ("PVTI_3", 3, Status::BugInvestigation, ReviewStatus::ClarificationReceived),
        ("PVTI_4", 4, Status::BugInvestigation, ReviewStatus::WaitingForClarification),
        ("PVTI_5", 5, Status::BugInvestigation, ReviewStatus::WaitingForReview),
        ("PVTI_6", 6, Status::BugInvestigation, ReviewStatus::Approved),
        ("PVTI_8", 8, Status::TechDesign, ReviewStatus::Empty),
    ];
    for (id, number, status, review) in rows {
        h.project.insert_item(item(id, number, status, review));
    }
    h
}

fn bugs() -> Box<dyn Workflow> {
    workflow::for_name(WorkflowName::BugInvestigation)
}

#[tokio::test]
async fn test_only_actionable_items_are_processed() {
    let h = board().await;
    let summary = run_batch(&h.state, bugs().as_ref(), &BatchOptions::default())
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(
        summary,
        BatchSummary {
            processed: 3,
            succeeded: 3,
            failed: 0,
            skipped: 0,
        }
    );
    assert_eq!(
        h.project.mutations(),
        vec![
            "review:PVTI_1:Waiting for Review".to_string(),
            "review:PVTI_2:Waiting for Review".to_string(),
            "review:PVTI_3:Waiting for Review".to_string(),
        ]
    );
    for issue in [1, 2, 3] {
        let comments = h.project.comments(issue);
        assert_eq!(comments.len(), 1, "issue #{issue}");
        assert!(comments[0].body.starts_with(INVESTIGATION_MARKER));
        assert!(comments[0].body.contains("Cache key ignores the locale"));
    }
    for issue in [4, 5, 6, 8] {
        assert!(h.project.comments(issue).is_empty(), "issue #{issue}");
    }

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 4);
    assert_eq!(texts.iter().filter(|t| t.contains("Bug investigation ready")).count(), 3);
    assert!(texts.iter().any(|t| t.contains("batch complete") && t.contains("Processed: 3")));
}

#[tokio::test]
async fn test_rerun_updates_report_in_place() {
    let h = board().await;
    let options = BatchOptions {
        id: Some("PVTI_1".to_string()),
        ..Default::default()
    };
    run_batch(&h.state, bugs().as_ref(), &options).await.unwrap();
    assert_eq!(h.project.comments(1).len(), 1);

    // A human asks for changes; the second run edits the same comment.
    h.project
        .update_item_review_status("PVTI_1", ReviewStatus::RequestChanges)
        .await
        .unwrap();
    run_batch(&h.state, bugs().as_ref(), &options).await.unwrap();
    h.settle().await;

    let comments = h.project.comments(1);
    assert_eq!(comments.len(), 1);
    assert_eq!(h.agent.calls(), 2);
}

#[tokio::test]
async fn test_limit_caps_the_batch() {
    let h = board().await;
    let options = BatchOptions {
        limit: Some(1),
        ..Default::default()
    };
    let summary = run_batch(&h.state, bugs().as_ref(), &options).await.unwrap();
    h.settle().await;

    assert_eq!(summary.processed, 1);
    assert_eq!(h.project.comments(1).len(), 1);
    assert!(h.project.comments(2).is_empty());
    // Single-item batches send no summary.
    assert_eq!(h.transport.texts().len(), 1);
}

#[tokio::test]
async fn test_id_at_other_status_is_skipped() {
    let h = board().await;
    let options = BatchOptions {
        id: Some("PVTI_8".to_string()),
        ..Default::default()
    };
    let summary = run_batch(&h.state, bugs().as_ref(), &options).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(h.agent.calls(), 0);
}

#[tokio::test]
async fn test_unknown_id_is_an_error() {
    let h = board().await;
    let options = BatchOptions {
        id: Some("PVTI_404".to_string()),
        ..Default::default()
    };
    let err = run_batch(&h.state, bugs().as_ref(), &options).await.unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[tokio::test]
async fn test_blocked_item_by_id_is_not_run() {
    let h = board().await;
    let options = BatchOptions {
        id: Some("PVTI_4".to_string()),
        ..Default::default()
    };
    let summary = run_batch(&h.state, bugs().as_ref(), &options).await.unwrap();

    assert_eq!(summary, BatchSummary::default());
    assert_eq!(h.agent.calls(), 0);
}

#[tokio::test]
async fn test_locked_item_is_skipped() {
    let h = board().await;
    let other_run = LockManager::with_ttl(h.locks_dir(), Duration::from_secs(3600));
    let held = other_run.try_acquire("PVTI_2").unwrap().unwrap();

    let summary = run_batch(&h.state, bugs().as_ref(), &BatchOptions::default())
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.agent.calls(), 2);
    assert!(h.project.comments(2).is_empty());
    drop(held);
}

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let h = board().await;
    let options = BatchOptions {
        dry_run: true,
        ..Default::default()
    };
    let summary = run_batch(&h.state, bugs().as_ref(), &options).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 3);
    assert!(h.project.mutations().is_empty());
    assert!(h.project.comments(1).is_empty());
    assert!(h.transport.texts().is_empty());

    let log = h.state.logger.read_log(1).await.unwrap().unwrap();
    assert!(log.contains("Would post the investigation on #1"));
}

#[test]
fn test_partition_covers_every_status_combination() {
    let mut all = Vec::new();
    for (i, status) in Status::ALL.into_iter().enumerate() {
        for (j, review) in ReviewStatus::ALL.into_iter().enumerate() {
            let n = (i * 10 + j) as u64 + 1;
            all.push(item(&format!("PVTI_{n}"), n, status, review));
        }
    }

    for name in WorkflowName::ALL {
        let wf = workflow::for_name(name);
        let filter = ItemFilter::statuses(wf.statuses());
        let candidates: Vec<_> = all.iter().filter(|i| filter.matches(i)).cloned().collect();
        let classified = candidates.iter().filter(|i| wf.classify(i).is_some()).count();

        let partition = Partition::build(candidates, |i| wf.classify(i));
        let mut ids: Vec<&str> = partition
            .new
            .iter()
            .chain(&partition.feedback)
            .chain(&partition.clarification)
            .chain(&partition.blocked)
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids.len(), classified, "{name}");
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), classified, "{name}: item in two flows");
    }

    let wf = bugs();
    let at_bug: Vec<_> = all
        .iter()
        .filter(|i| i.status == Status::BugInvestigation)
        .cloned()
        .collect();
    let partition = Partition::build(at_bug, |i| wf.classify(i));
    assert_eq!(partition.new.len(), 1);
    assert_eq!(partition.feedback.len(), 1);
    assert_eq!(partition.clarification.len(), 1);
    assert_eq!(partition.blocked.len(), 1);
    assert_eq!(partition.eligible(), 3);
}

#[test]
fn test_concurrent_runs_take_the_lock_once() {
    let dir = tempfile::tempdir().unwrap();
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let path = dir.path().to_path_buf();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let locks = LockManager::with_ttl(path, Duration::from_secs(3600));
                barrier.wait();
                let guard = locks.try_acquire("PVTI_42").unwrap();
                let acquired = guard.is_some();
                // Hold until both threads have tried.
                barrier.wait();
                drop(guard);
                acquired
            })
        })
        .collect();

    let acquired: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(acquired.iter().filter(|a| **a).count(), 1);
}
