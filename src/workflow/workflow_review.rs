//! Workflow review: read the execution log of a finished issue and report
//! how the agents handled it.

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::prompt::workflow_review_prompt;
use crate::artifact::comments::upsert_marked_comment;
use crate::error::{AppError, Result};
use crate::notify::Notification;
use crate::platform::types::{Status, WorkflowItem};
use crate::state::AppState;
use crate::workflow::{
    issue_ref, run_agent, schema, string_field, structured_output, AgentCall, Flow, ItemOutcome, ItemRun,
    Workflow, WorkflowName,
};

pub const WORKFLOW_REVIEW_MARKER: &str = "<!-- agent-workflow:workflow-review -->";

pub struct WorkflowReview;

fn findings_comment(structured: Option<&Value>, content: Option<&str>) -> Option<String> {
    let findings = string_field(structured, &["findings"]).or_else(|| {
        content
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    })?;
    let mut body = format!("{WORKFLOW_REVIEW_MARKER}\n## Workflow Review\n\n{findings}\n");
    let recommendations: Vec<&str> = structured
        .and_then(|v| v["recommendations"].as_array())
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !recommendations.is_empty() {
        body.push_str("\n### Recommendations\n");
        for r in recommendations {
            body.push_str(&format!("- {r}\n"));
        }
    }
    Some(body)
}

#[async_trait]
impl Workflow for WorkflowReview {
    fn name(&self) -> WorkflowName {
        WorkflowName::WorkflowReview
    }

    fn statuses(&self) -> &'static [Status] {
        &[Status::Done]
    }

    fn classify(&self, _item: &WorkflowItem) -> Option<Flow> {
        Some(Flow::New)
    }

    async fn is_pending(&self, state: &AppState, item: &WorkflowItem) -> Result<bool> {
        let issue = item.issue_number();
        if state.store.get(issue).await?.is_some_and(|r| r.workflow_reviewed) {
            return Ok(false);
        }
        if !state.logger.log_exists(issue) {
            return Ok(false);
        }
        // Remote stores claim every key exists; only a read tells.
        Ok(state.logger.read_log(issue).await?.is_some())
    }

    async fn process(&self, run: &ItemRun<'_>) -> Result<ItemOutcome> {
        let state = run.state;
        let item = run.item;
        let issue = item.issue_number();

        let log = state
            .logger
            .read_log(issue)
            .await?
            .ok_or_else(|| AppError::Store(format!("no execution log for #{issue}")))?;

        let prompt = workflow_review_prompt(&state.repo_full_name(), item, &log);
        let call = AgentCall {
            schema: Some(schema::workflow_review()),
            allow_write: false,
        };
        let result = run_agent(run, self.name(), prompt, call).await?;
        let structured = structured_output(&result);

        let comment = findings_comment(structured.as_ref(), result.content.as_deref())
            .ok_or_else(|| AppError::Parse("no findings in agent output".to_string()))?;
        let summary = string_field(structured.as_ref(), &["summary"]).unwrap_or_else(|| "Reviewed".to_string());

        if run.options.dry_run {
            state
                .logger
                .log_dry_run(run.ctx, &format!("post workflow findings on #{issue} and mark it reviewed"));
            return Ok(ItemOutcome::Completed(Some(summary)));
        }

        upsert_marked_comment(state.project.as_ref(), issue, WORKFLOW_REVIEW_MARKER, &comment).await?;
        state.store.mark_workflow_reviewed(issue, &summary).await?;
        state.logger.log_github_action(run.ctx, "Posted workflow review", &format!("#{issue}"));

        state.notifier.notify(Notification::WorkflowReviewed {
            issue: issue_ref(item),
            summary: summary.clone(),
        });
        Ok(ItemOutcome::Completed(Some(summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_findings_with_recommendations() {
        let v = json!({
            "findings": "Two failed runs on the same timeout.",
            "recommendations": ["Raise the implement timeout"]
        });
        let body = findings_comment(Some(&v), None).unwrap();
        assert!(body.starts_with(WORKFLOW_REVIEW_MARKER));
        assert!(body.contains("- Raise the implement timeout"));
    }

    #[test]
    fn test_findings_fall_back_to_text() {
        let body = findings_comment(None, Some("Plain text review")).unwrap();
        assert!(body.contains("Plain text review"));
        assert!(findings_comment(None, Some("   ")).is_none());
    }
}
