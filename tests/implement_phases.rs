mod common;

use agent_workflow::parse::ImplementationPhase;
use agent_workflow::platform::types::{ReviewStatus, Status};
use agent_workflow::store::WorkflowStore;
use agent_workflow::workflow::{self, run_batch, BatchOptions, WorkflowName};
use common::{item, Harness, ScriptedAgent};
use serde_json::json;

fn phases(n: u32) -> Vec<ImplementationPhase> {
    (1..=n)
        .map(|order| ImplementationPhase {
            order,
            total: n,
            title: format!("Step {order}"),
            description: format!("Do step {order}"),
            files_affected: vec![],
        })
        .collect()
}

fn offline() -> BatchOptions {
    BatchOptions {
        skip_push: true,
        skip_pull: true,
        skip_local_test: true,
        ..Default::default()
    }
}

fn implementing_agent() -> ScriptedAgent {
    ScriptedAgent::new(
        Some(json!({"success": true, "summary": "Implemented the step", "prDescription": "Adds widgets"})),
        Some("done"),
    )
}

async fn harness_at_phase(phase: &str) -> Harness {
    let h = Harness::new(implementing_agent()).await;
    let mut it = item("PVTI_7", 7, Status::Implementation, ReviewStatus::Empty);
    it.implementation_phase = phase.to_string();
    h.project.insert_item(it);
    h.store.save_phases(7, &phases(4)).await.unwrap();
    h
}

#[tokio::test]
async fn test_middle_phase_advances_to_next() {
    let h = harness_at_phase("2/4").await;
    h.create_branch("feature/issue-7-phase-1");

    let wf = workflow::for_name(WorkflowName::Implement);
    let summary = run_batch(&h.state, wf.as_ref(), &offline()).await.unwrap();
    h.settle().await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        h.project.mutations(),
        vec![
            "phase:PVTI_7:3/4".to_string(),
            "review:PVTI_7:clear".to_string(),
            "status:PVTI_7:Implementation".to_string(),
        ]
    );
    assert!(h.branch_exists("feature/issue-7-phase-2"));
    assert!(h.project.pull_requests().is_empty());

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Phase 2/4 complete"));
    assert_eq!(h.state.workspace.current_branch().await.unwrap(), "main");
}

#[tokio::test]
async fn test_last_phase_opens_pull_request() {
    let h = harness_at_phase("4/4").await;
    h.create_branch("feature/issue-7-phase-3");

    let wf = workflow::for_name(WorkflowName::Implement);
    let summary = run_batch(&h.state, wf.as_ref(), &offline()).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        h.project.mutations(),
        vec![
            "phase:PVTI_7:clear".to_string(),
            "status:PVTI_7:PR Review".to_string(),
            "review:PVTI_7:Waiting for Review".to_string(),
        ]
    );

    let prs = h.project.pull_requests();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].head_branch, "feature/issue-7-phase-4");
    assert_eq!(prs[0].base_branch, "main");
    assert!(prs[0].body.contains("Closes #7"));
    assert!(prs[0].body.contains("- [x] Phase 4/4: Step 4"));

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("ready for review"));
}

#[tokio::test]
async fn test_first_run_sets_phase_one() {
    let h = harness_at_phase("").await;

    let wf = workflow::for_name(WorkflowName::Implement);
    let summary = run_batch(&h.state, wf.as_ref(), &offline()).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    let mutations = h.project.mutations();
    assert_eq!(mutations[0], "phase:PVTI_7:1/4");
    assert_eq!(mutations[1], "phase:PVTI_7:2/4");
    assert!(h.branch_exists("feature/issue-7-phase-1"));
}

#[tokio::test]
async fn test_stale_phase_total_fails_item() {
    let h = harness_at_phase("2/3").await;

    let wf = workflow::for_name(WorkflowName::Implement);
    let summary = run_batch(&h.state, wf.as_ref(), &offline()).await.unwrap();
    h.settle().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(h.agent.calls(), 0);
    assert!(h.project.mutations().is_empty());

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 1);
    let log = h.state.logger.read_log(7).await.unwrap().unwrap();
    assert!(log.contains("3 phases") || log.contains("4 phases"));
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = harness_at_phase("2/4").await;
    h.create_branch("feature/issue-7-phase-1");

    let options = BatchOptions {
        dry_run: true,
        ..Default::default()
    };
    let wf = workflow::for_name(WorkflowName::Implement);
    let summary = run_batch(&h.state, wf.as_ref(), &options).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.agent.calls(), 1);
    assert!(h.project.mutations().is_empty());
    assert!(h.project.comments(7).is_empty());
    assert!(h.project.pull_requests().is_empty());
    assert!(h.transport.texts().is_empty());
    assert!(!h.branch_exists("feature/issue-7-phase-2"));
    assert!(!h.repo().join("change-1.txt").exists());

    let log = h.state.logger.read_log(7).await.unwrap().unwrap();
    assert!(log.contains("Would check out `feature/issue-7-phase-2`"));
    assert!(log.contains("Would push `feature/issue-7-phase-2` and advance to phase 3"));
}

#[tokio::test]
async fn test_agent_clarification_parks_item() {
    let agent = ScriptedAgent::new(
        Some(json!({
            "success": false,
            "summary": "",
            "needsClarification": true,
            "clarification": {"question": "Which currency should totals use?"}
        })),
        None,
    );
    let h = Harness::new(agent).await;
    h.project
        .insert_item(item("PVTI_9", 9, Status::Implementation, ReviewStatus::Empty));

    let wf = workflow::for_name(WorkflowName::Implement);
    let summary = run_batch(&h.state, wf.as_ref(), &offline()).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        h.project.mutations(),
        vec!["review:PVTI_9:Waiting for Clarification".to_string()]
    );
    let comments = h.project.comments(9);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.contains("Which currency should totals use?"));
    assert_eq!(h.state.workspace.current_branch().await.unwrap(), "main");
}

#[tokio::test]
async fn test_missing_structured_result_fails_before_advancing() {
    let h = Harness::new(ScriptedAgent::new(None, Some("I could not finish, sorry."))).await;
    let mut it = item("PVTI_7", 7, Status::Implementation, ReviewStatus::Empty);
    it.implementation_phase = "2/4".to_string();
    h.project.insert_item(it);
    h.store.save_phases(7, &phases(4)).await.unwrap();
    h.create_branch("feature/issue-7-phase-1");

    let wf = workflow::for_name(WorkflowName::Implement);
    let summary = run_batch(&h.state, wf.as_ref(), &offline()).await.unwrap();
    h.settle().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);
    assert!(h.project.mutations().is_empty());
    assert!(h.project.pull_requests().is_empty());

    let log = h.state.logger.read_log(7).await.unwrap().unwrap();
    assert!(log.contains("no structured implementation result"));
}
