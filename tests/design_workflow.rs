mod common;

use agent_workflow::artifact::comments::{parse_phase_comment, render_phase_comment, ARTIFACT_MARKER, PHASES_MARKER};
use agent_workflow::artifact::{resolve_phase_details, PhaseQuery};
use agent_workflow::parse::{extract_tech_design, ImplementationPhase};
use agent_workflow::platform::types::{ReviewStatus, Status};
use agent_workflow::platform::ProjectManager;
use agent_workflow::store::WorkflowStore;
use agent_workflow::workflow::{self, run_batch, BatchOptions, WorkflowName};
use common::{item, Harness, ScriptedAgent};
use serde_json::json;

const DESIGN: &str = "# Tech design\n\n### Phase 1: Schema\nAdd the tables.\n\n### Phase 2: API\nExpose them.\n";

fn designer() -> ScriptedAgent {
    ScriptedAgent::new(Some(json!({"design": DESIGN, "summary": "Two phases"})), None)
}

#[tokio::test]
async fn test_tech_design_commits_and_records_phases() {
    let h = Harness::new(designer()).await;
    h.project
        .insert_item(item("PVTI_12", 12, Status::TechDesign, ReviewStatus::Empty));

    let options = BatchOptions {
        skip_push: true,
        ..Default::default()
    };
    let wf = workflow::for_name(WorkflowName::TechDesign);
    let summary = run_batch(&h.state, wf.as_ref(), &options).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    assert!(h.branch_exists("docs/issue-12"));
    assert_eq!(h.state.workspace.current_branch().await.unwrap(), "main");
    assert_eq!(
        h.project.mutations(),
        vec!["review:PVTI_12:Waiting for Review".to_string()]
    );

    let record = h.store.get(12).await.unwrap().unwrap();
    let phases = record.phases.unwrap();
    assert_eq!(phases.len(), 2);
    assert_eq!(phases[1].title, "API");

    let comments = h.project.comments(12);
    assert_eq!(comments.len(), 2);
    assert!(comments.iter().any(|c| c.body.starts_with(ARTIFACT_MARKER)
        && c.body.contains("design-docs/issue-12/tech-design.md")));
    assert!(comments.iter().any(|c| c.body.starts_with(PHASES_MARKER)));

    let body = h.project.item("PVTI_12").unwrap().content.body;
    assert!(body.starts_with("Body of issue 12"));
    assert!(extract_tech_design(&body).unwrap().contains("Expose them."));

    let texts = h.transport.texts();
    assert_eq!(texts.len(), 1);
}

#[tokio::test]
async fn test_rerun_after_feedback_keeps_one_comment_each() {
    let h = Harness::new(designer()).await;
    h.project
        .insert_item(item("PVTI_12", 12, Status::TechDesign, ReviewStatus::Empty));

    let options = BatchOptions {
        skip_push: true,
        ..Default::default()
    };
    let wf = workflow::for_name(WorkflowName::TechDesign);
    run_batch(&h.state, wf.as_ref(), &options).await.unwrap();

    h.project.seed_comment(12, "alice", "Split the API phase in two.");
    h.project
        .update_item_review_status("PVTI_12", ReviewStatus::RequestChanges)
        .await
        .unwrap();
    let summary = run_batch(&h.state, wf.as_ref(), &options).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.agent.calls(), 2);
    let comments = h.project.comments(12);
    assert_eq!(comments.iter().filter(|c| c.body.starts_with(ARTIFACT_MARKER)).count(), 1);
    assert_eq!(comments.iter().filter(|c| c.body.starts_with(PHASES_MARKER)).count(), 1);
    assert_eq!(
        h.project.item("PVTI_12").unwrap().review_status,
        ReviewStatus::WaitingForReview
    );
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = Harness::new(designer()).await;
    h.project
        .insert_item(item("PVTI_12", 12, Status::TechDesign, ReviewStatus::Empty));

    let options = BatchOptions {
        dry_run: true,
        ..Default::default()
    };
    let wf = workflow::for_name(WorkflowName::TechDesign);
    let summary = run_batch(&h.state, wf.as_ref(), &options).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    assert!(!h.branch_exists("docs/issue-12"));
    assert!(h.store.get(12).await.unwrap().is_none());
    assert!(h.project.comments(12).is_empty());
    assert!(h.project.mutations().is_empty());
    assert!(!h.repo().join("design-docs").exists());

    let log = h.state.logger.read_log(12).await.unwrap().unwrap();
    assert!(log.contains("Would record 2 implementation phases"));
}

#[tokio::test]
async fn test_revision_to_single_phase_retracts_old_phases() {
    let agent = ScriptedAgent::new(Some(json!({"design": "# Tech design\n\nOne step only."})), None);
    let h = Harness::new(agent).await;
    h.project
        .insert_item(item("PVTI_12", 12, Status::TechDesign, ReviewStatus::RequestChanges));

    let old: Vec<ImplementationPhase> = (1..=3)
        .map(|order| ImplementationPhase {
            order,
            total: 3,
            title: format!("Old {order}"),
            description: String::new(),
            files_affected: vec![],
        })
        .collect();
    h.store.save_phases(12, &old).await.unwrap();
    h.project
        .seed_comment(12, "agent-workflow[bot]", &render_phase_comment(&old));

    let options = BatchOptions {
        skip_push: true,
        ..Default::default()
    };
    let wf = workflow::for_name(WorkflowName::TechDesign);
    let summary = run_batch(&h.state, wf.as_ref(), &options).await.unwrap();
    h.settle().await;

    assert_eq!(summary.succeeded, 1);
    assert!(h.store.get(12).await.unwrap().unwrap().phases.is_none());

    let comments = h.project.comments(12);
    let phase_comments: Vec<_> = comments.iter().filter(|c| c.body.starts_with(PHASES_MARKER)).collect();
    assert_eq!(phase_comments.len(), 1);
    assert!(parse_phase_comment(&phase_comments[0].body).is_none());

    let body = h.project.item("PVTI_12").unwrap().content.body;
    let resolved = resolve_phase_details(
        &h.state.phase_sources,
        PhaseQuery {
            issue_number: 12,
            issue_body: &body,
        },
    )
    .await;
    assert!(resolved.is_none());
}
