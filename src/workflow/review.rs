//! Automated pull request review: read the open PR for an issue, post a
//! review on it and record the decision on the board.

use async_trait::async_trait;

use crate::agent::prompt::pr_review_prompt;
use crate::artifact::DesignKind;
use crate::error::{AppError, Result};
use crate::notify::Notification;
use crate::parse::{extract_review, parse_phase_string, parse_review_decision, ReviewDecision};
use crate::platform::types::{ReviewStatus, Status, WorkflowItem};
use crate::workflow::{
    issue_ref, run_agent, schema, set_review_status, string_field, structured_output, tool_note, AgentCall,
    Flow, ItemOutcome, ItemRun, Workflow, WorkflowName,
};

pub struct PrReview;

/// Decision and review text from the agent's answer.
fn read_review(structured: Option<&serde_json::Value>, content: Option<&str>) -> (ReviewDecision, String) {
    if let Some(decision) = string_field(structured, &["decision"]) {
        let review = string_field(structured, &["review", "summary"]).unwrap_or_default();
        return (parse_review_decision(&decision), review);
    }
    let extracted = extract_review(content.unwrap_or_default());
    (extracted.decision, extracted.summary)
}

fn review_comment(decision: ReviewDecision, review: &str) -> String {
    tool_note(&format!("## Automated review: {}\n\n{}", decision.label(), review.trim()))
}

#[async_trait]
impl Workflow for PrReview {
    fn name(&self) -> WorkflowName {
        WorkflowName::PrReview
    }

    fn statuses(&self) -> &'static [Status] {
        &[Status::PrReview]
    }

    /// Only PRs waiting for review are picked up. Everything else at this
    /// status is already with a human or back with the implementer.
    fn classify(&self, item: &WorkflowItem) -> Option<Flow> {
        (item.review_status == ReviewStatus::WaitingForReview).then_some(Flow::New)
    }

    async fn process(&self, run: &ItemRun<'_>) -> Result<ItemOutcome> {
        let state = run.state;
        let item = run.item;
        let issue = item.issue_number();

        let pr = state
            .project
            .find_open_pr_for_issue(issue)
            .await?
            .ok_or_else(|| AppError::GitHubApi(format!("no open pull request found for #{issue}")))?;

        let tech_design = state.designs.load(issue, DesignKind::TechDesign, &item.content.body).await;
        let phase = parse_phase_string(&item.implementation_phase);
        let prompt = pr_review_prompt(&state.repo_full_name(), item, &pr, tech_design.as_deref(), phase);
        let call = AgentCall {
            schema: Some(schema::pr_review()),
            allow_write: false,
        };
        let result = run_agent(run, self.name(), prompt, call).await?;
        let structured = structured_output(&result);

        let (decision, review) = read_review(structured.as_ref(), result.content.as_deref());
        if review.trim().is_empty() {
            return Err(AppError::Parse("agent returned an empty review".to_string()));
        }
        let summary = string_field(structured.as_ref(), &["summary"]).unwrap_or_else(|| decision.label().to_string());

        if run.options.dry_run {
            state.logger.log_dry_run(
                run.ctx,
                &format!("post a \"{}\" review on PR #{}", decision.label(), pr.number),
            );
            return Ok(ItemOutcome::Completed(Some(summary)));
        }

        state
            .project
            .add_issue_comment(pr.number, &review_comment(decision, &review))
            .await?;
        state
            .logger
            .log_github_action(run.ctx, "Posted review", &format!("PR #{}: {}", pr.number, decision.label()));

        match decision {
            ReviewDecision::Approve => set_review_status(run, ReviewStatus::Approved).await?,
            ReviewDecision::RequestChanges => set_review_status(run, ReviewStatus::RequestChanges).await?,
            ReviewDecision::CommentOnly => {
                if state.project.has_review_status_field() {
                    state.project.clear_item_review_status(&item.id).await?;
                    state
                        .logger
                        .log_status_transition(run.ctx, &item.review_status.to_string(), &ReviewStatus::Empty.to_string());
                }
            }
        }

        state.notifier.notify(Notification::ReviewPosted {
            issue: issue_ref(item),
            pr_number: pr.number,
            pr_url: pr.url.clone(),
            decision,
        });
        Ok(ItemOutcome::Completed(Some(summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::NOTE_MARKER;
    use serde_json::json;

    #[test]
    fn test_structured_decision() {
        let v = json!({"decision": "request-changes", "review": "Missing tests"});
        let (decision, review) = read_review(Some(&v), None);
        assert_eq!(decision, ReviewDecision::RequestChanges);
        assert_eq!(review, "Missing tests");
    }

    #[test]
    fn test_text_decision() {
        let (decision, review) = read_review(None, Some("Looks fine overall.\n\nDecision: approve"));
        assert_eq!(decision, ReviewDecision::Approve);
        assert!(review.contains("Looks fine"));
    }

    #[test]
    fn test_unrecognised_decision_only_comments() {
        let v = json!({"decision": "ship it!!", "review": "Nice"});
        assert_eq!(read_review(Some(&v), None).0, ReviewDecision::CommentOnly);
    }

    #[test]
    fn test_review_comment_heading() {
        let body = review_comment(ReviewDecision::Approve, "  All good  ");
        assert_eq!(body, format!("{NOTE_MARKER}\n## Automated review: Approved\n\nAll good"));
    }
}
