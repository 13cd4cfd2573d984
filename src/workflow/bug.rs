//! Bug investigation: root-cause a reported bug and post the findings on
//! the issue for a human to confirm before any fix is attempted.

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::prompt::{bug_investigation_prompt, FeedbackContext};
use crate::artifact::comments::{find_marked_comment, upsert_marked_comment};
use crate::error::{AppError, Result};
use crate::notify::Notification;
use crate::parse::extract_markdown;
use crate::platform::types::{ReviewStatus, Status};
use crate::workflow::{
    clarification_in, gather_feedback, issue_ref, request_clarification, run_agent, schema,
    set_review_status, string_field, structured_output, AgentCall, Flow, ItemOutcome, ItemRun, Workflow,
    WorkflowName,
};

pub const INVESTIGATION_MARKER: &str = "<!-- agent-workflow:bug-investigation -->";

pub struct BugInvestigation;

/// The comment posted on the issue. Uses the agent's `report` when given,
/// otherwise assembles one from the individual fields.
fn render_report(structured: Option<&Value>, fallback: Option<&str>) -> Option<String> {
    let report = string_field(structured, &["report"]).or_else(|| {
        let root_cause = string_field(structured, &["rootCause"])?;
        let mut text = format!("### Root cause\n{root_cause}\n");
        if let Some(fix) = string_field(structured, &["proposedFix"]) {
            text.push_str(&format!("\n### Proposed fix\n{fix}\n"));
        }
        let files: Vec<&str> = structured
            .and_then(|v| v["affectedFiles"].as_array())
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !files.is_empty() {
            text.push_str("\n### Affected files\n");
            for f in files {
                text.push_str(&format!("- `{f}`\n"));
            }
        }
        Some(text)
    });
    let report = report.or_else(|| fallback.and_then(extract_markdown))?;

    let confidence = string_field(structured, &["confidence"])
        .map(|c| format!("\n\n**Confidence:** {c}"))
        .unwrap_or_default();
    Some(format!(
        "{INVESTIGATION_MARKER}\n## Bug Investigation\n\n{}{confidence}",
        report.trim()
    ))
}

#[async_trait]
impl Workflow for BugInvestigation {
    fn name(&self) -> WorkflowName {
        WorkflowName::BugInvestigation
    }

    fn statuses(&self) -> &'static [Status] {
        &[Status::BugInvestigation]
    }

    async fn process(&self, run: &ItemRun<'_>) -> Result<ItemOutcome> {
        let state = run.state;
        let item = run.item;
        let issue = item.issue_number();

        let (comments, clarification) = gather_feedback(run).await?;
        let previous = if run.flow == Flow::Feedback {
            let existing = state.project.get_issue_comments(issue).await?;
            find_marked_comment(&existing, INVESTIGATION_MARKER).map(|c| c.body.clone())
        } else {
            None
        };
        let feedback = FeedbackContext {
            previous: previous.as_deref(),
            comments: &comments,
            clarification: clarification.as_deref(),
        };

        let prompt = bug_investigation_prompt(&state.repo_full_name(), item, &feedback);
        let call = AgentCall {
            schema: Some(schema::bug_investigation()),
            allow_write: false,
        };
        let result = run_agent(run, self.name(), prompt, call).await?;
        let structured = structured_output(&result);

        if let Some(request) = clarification_in(&result, structured.as_ref()) {
            return request_clarification(run, self.name(), &request).await;
        }

        let report = render_report(structured.as_ref(), result.content.as_deref())
            .ok_or_else(|| AppError::Parse("no investigation report in agent output".to_string()))?;
        let summary = string_field(structured.as_ref(), &["rootCause"]);

        if run.options.dry_run {
            state.logger.log_dry_run(
                run.ctx,
                &format!(
                    "post the investigation on #{issue} and set review status to {}",
                    ReviewStatus::WaitingForReview
                ),
            );
            return Ok(ItemOutcome::Completed(summary));
        }

        upsert_marked_comment(state.project.as_ref(), issue, INVESTIGATION_MARKER, &report).await?;
        state.logger.log_github_action(run.ctx, "Posted investigation", &format!("#{issue}"));

        set_review_status(run, ReviewStatus::WaitingForReview).await?;
        state.notifier.notify(Notification::InvestigationReady {
            issue: issue_ref(item),
            summary: summary.clone(),
        });
        Ok(ItemOutcome::Completed(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_built_from_fields() {
        let structured = json!({
            "rootCause": "Off-by-one in pagination",
            "proposedFix": "Use `<` instead of `<=`",
            "affectedFiles": ["src/page.rs"],
            "confidence": "high"
        });
        let report = render_report(Some(&structured), None).unwrap();
        assert!(report.starts_with(INVESTIGATION_MARKER));
        assert!(report.contains("### Root cause\nOff-by-one in pagination"));
        assert!(report.contains("- `src/page.rs`"));
        assert!(report.contains("**Confidence:** high"));
    }

    #[test]
    fn test_report_field_wins() {
        let structured = json!({"report": "Full report", "rootCause": "ignored"});
        let report = render_report(Some(&structured), None).unwrap();
        assert!(report.contains("Full report"));
        assert!(!report.contains("ignored"));
    }

    #[test]
    fn test_no_report_at_all() {
        assert!(render_report(Some(&json!({})), None).is_none());
    }
}
