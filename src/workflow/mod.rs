//! The pipeline workflows and the batch machinery that drives them.
//!
//! Each workflow declares which board statuses it serves and how an item's
//! review status maps to a [`Flow`]. The runner in [`runner`] selects,
//! locks and processes items; a workflow only implements one item.

pub mod bug;
pub mod design;
pub mod error;
pub mod implement;
pub mod review;
pub mod runner;
pub mod schema;
pub mod triage;
pub mod types;
pub mod workflow_review;

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{AgentRunResult, RunOptions};
use crate::error::{AppError, Result};
use crate::logging::{ExecutionSummary, LogContext};
use crate::notify::{IssueRef, Notification};
use crate::parse::{extract_clarification, extract_json, ClarificationRequest, CLARIFICATION_MARKER};
use crate::platform::types::{Comment, ReviewStatus, Status, WorkflowItem};
use crate::state::AppState;

pub use runner::{run_batch, BatchSummary};
pub use types::{classify_review_status, Flow, Partition, WorkflowName};

/// Author suffix GitHub gives app and bot accounts.
const BOT_SUFFIX: &str = "[bot]";

/// First line of the progress notes the workflows post. With a personal
/// access token the author is a person, so the marker is what identifies
/// these as automated.
pub const NOTE_MARKER: &str = "<!-- agent-workflow:note -->";

pub fn tool_note(text: &str) -> String {
    format!("{NOTE_MARKER}\n{text}")
}

/// Options shared by every batch command.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Process only this project item.
    pub id: Option<String>,
    pub dry_run: bool,
    pub stream: bool,
    pub verbose: bool,
    pub limit: Option<usize>,
    pub skip_push: bool,
    pub skip_pull: bool,
    pub skip_local_test: bool,
}

/// One item being processed, with everything a workflow needs.
pub struct ItemRun<'a> {
    pub state: &'a AppState,
    pub item: &'a WorkflowItem,
    pub flow: Flow,
    pub options: &'a BatchOptions,
    pub ctx: &'a LogContext,
    /// Usage of the agent run, picked up by the runner for the closing
    /// log entry.
    execution: Mutex<ExecutionSummary>,
}

impl<'a> ItemRun<'a> {
    pub fn new(
        state: &'a AppState,
        item: &'a WorkflowItem,
        flow: Flow,
        options: &'a BatchOptions,
        ctx: &'a LogContext,
    ) -> Self {
        Self {
            state,
            item,
            flow,
            options,
            ctx,
            execution: Mutex::new(ExecutionSummary::default()),
        }
    }

    fn record(&self, result: &AgentRunResult) {
        if let Ok(mut execution) = self.execution.lock() {
            *execution = ExecutionSummary::from_result(result);
        }
    }

    /// Summary of the agent run, marked successful.
    pub fn execution_summary(&self) -> ExecutionSummary {
        let mut summary = self
            .execution
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default();
        summary.success = true;
        summary.error = None;
        summary
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed(Option<String>),
    /// The agent asked a question; the item now waits on a human.
    ClarificationRequested,
}

#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> WorkflowName;

    /// Board statuses this workflow picks items from.
    fn statuses(&self) -> &'static [Status];

    fn classify(&self, item: &WorkflowItem) -> Option<Flow> {
        classify_review_status(item.review_status)
    }

    /// Whether the working tree must be clean before a real run.
    fn requires_clean_tree(&self) -> bool {
        false
    }

    /// Extra per-item filter applied after classification.
    async fn is_pending(&self, _state: &AppState, _item: &WorkflowItem) -> Result<bool> {
        Ok(true)
    }

    async fn process(&self, run: &ItemRun<'_>) -> Result<ItemOutcome>;

    /// Undo local state after a failure, e.g. return to the default branch.
    async fn cleanup(&self, _state: &AppState) -> Result<()> {
        Ok(())
    }
}

pub fn for_name(name: WorkflowName) -> Box<dyn Workflow> {
    match name {
        WorkflowName::BugInvestigation => Box::new(bug::BugInvestigation),
        WorkflowName::ProductDevelopment => {
            Box::new(design::DesignWorkflow::new(crate::artifact::DesignKind::ProductDevelopment))
        }
        WorkflowName::ProductDesign => {
            Box::new(design::DesignWorkflow::new(crate::artifact::DesignKind::ProductDesign))
        }
        WorkflowName::TechDesign => Box::new(design::DesignWorkflow::new(crate::artifact::DesignKind::TechDesign)),
        WorkflowName::Implement => Box::new(implement::Implement),
        WorkflowName::PrReview => Box::new(review::PrReview),
        WorkflowName::Triage => Box::new(triage::Triage),
        WorkflowName::WorkflowReview => Box::new(workflow_review::WorkflowReview),
    }
}

/// Knobs for [`run_agent`] beyond the prompt.
#[derive(Debug, Clone, Default)]
pub struct AgentCall {
    pub schema: Option<Value>,
    pub allow_write: bool,
}

/// Run the configured agent for `run`'s workflow and log the exchange.
///
/// A failed run becomes `AppError::Agent`, a timed-out one
/// `AppError::Timeout`.
pub async fn run_agent(run: &ItemRun<'_>, workflow: WorkflowName, prompt: String, call: AgentCall) -> Result<AgentRunResult> {
    let state = run.state;
    let library = state.libraries.get(workflow.as_str()).await?;
    let timeout = state.libraries.timeout_for(workflow.as_str());

    state.logger.log_prompt(run.ctx, &prompt);
    tracing::info!(
        issue = run.item.issue_number(),
        workflow = %workflow,
        library = library.name(),
        timeout_secs = timeout.as_secs(),
        "Running agent"
    );

    let mut options = RunOptions::new(prompt, state.workspace.root());
    options.timeout = timeout;
    options.output_schema = call.schema;
    options.allow_write = call.allow_write;
    options.stream = run.options.stream;
    options.on_event = Some(state.logger.event_callback(run.ctx, run.options.stream));

    let result = library.run(options).await;
    run.record(&result);

    if let Some(text) = &result.content {
        state.logger.log_text_response(run.ctx, text);
    }
    state.logger.log_token_usage(run.ctx, &result.usage);

    if result.is_timeout() {
        return Err(AppError::Timeout(timeout.as_secs()));
    }
    if !result.success {
        return Err(AppError::Agent(
            result.error.clone().unwrap_or_else(|| "agent run failed".to_string()),
        ));
    }
    Ok(result)
}

/// The structured answer: the adapter's validated output, or JSON found in
/// the text.
pub fn structured_output(result: &AgentRunResult) -> Option<Value> {
    result
        .trusted_output()
        .cloned()
        .or_else(|| result.content.as_deref().and_then(extract_json))
}

/// A clarification request in the agent's answer, if it made one.
pub fn clarification_in(result: &AgentRunResult, structured: Option<&Value>) -> Option<ClarificationRequest> {
    structured
        .and_then(ClarificationRequest::from_structured)
        .or_else(|| result.content.as_deref().and_then(extract_clarification))
}

/// Post the question and park the item until a human answers.
pub async fn request_clarification(
    run: &ItemRun<'_>,
    workflow: WorkflowName,
    request: &ClarificationRequest,
) -> Result<ItemOutcome> {
    let state = run.state;
    let issue = run.item.issue_number();

    if run.options.dry_run {
        state
            .logger
            .log_dry_run(run.ctx, &format!("ask for clarification: {}", request.question));
        return Ok(ItemOutcome::ClarificationRequested);
    }

    state.project.add_issue_comment(issue, &request.to_comment()).await?;
    state
        .project
        .update_item_review_status(&run.item.id, ReviewStatus::WaitingForClarification)
        .await?;
    state.logger.log_github_action(run.ctx, "Clarification requested", &request.question);
    state.logger.log_status_transition(
        run.ctx,
        &run.item.review_status.to_string(),
        &ReviewStatus::WaitingForClarification.to_string(),
    );

    state.notifier.notify(Notification::NeedsClarification {
        issue: issue_ref(run.item),
        workflow: workflow.to_string(),
        question: request.question.clone(),
    });
    Ok(ItemOutcome::ClarificationRequested)
}

/// Hand the item to a human. Boards without a review-status field are left
/// alone.
pub async fn set_review_status(run: &ItemRun<'_>, status: ReviewStatus) -> Result<()> {
    let state = run.state;
    if !state.project.has_review_status_field() {
        tracing::warn!(issue = run.item.issue_number(), "Board has no review status field");
        return Ok(());
    }
    state.project.update_item_review_status(&run.item.id, status).await?;
    state
        .logger
        .log_status_transition(run.ctx, &run.item.review_status.to_string(), &status.to_string());
    Ok(())
}

pub fn issue_ref(item: &WorkflowItem) -> IssueRef {
    IssueRef {
        number: item.issue_number(),
        title: item.content.title.clone(),
        url: item.content.url.clone(),
        item_id: item.id.clone(),
    }
}

fn is_automated(comment: &Comment) -> bool {
    comment.author.ends_with(BOT_SUFFIX) || comment.body.trim_start().starts_with("<!--")
}

/// Comments written by people, oldest first.
pub fn human_comments(comments: &[Comment]) -> Vec<Comment> {
    comments.iter().filter(|c| !is_automated(c)).cloned().collect()
}

/// The question last asked and the human replies posted after it.
pub fn clarification_answer(comments: &[Comment]) -> Option<String> {
    let asked = comments
        .iter()
        .rposition(|c| c.body.trim_start().starts_with(CLARIFICATION_MARKER))?;
    let replies: Vec<&str> = comments[asked + 1..]
        .iter()
        .filter(|c| !is_automated(c))
        .map(|c| c.body.trim())
        .collect();
    if replies.is_empty() {
        return None;
    }
    Some(format!(
        "### Question\n{}\n\n### Answer\n{}",
        comments[asked].body.trim(),
        replies.join("\n\n")
    ))
}

/// Human context for a feedback or clarification run.
pub async fn gather_feedback(run: &ItemRun<'_>) -> Result<(Vec<Comment>, Option<String>)> {
    match run.flow {
        Flow::Feedback => {
            let comments = run.state.project.get_issue_comments(run.item.issue_number()).await?;
            Ok((human_comments(&comments), None))
        }
        Flow::Clarification => {
            let comments = run.state.project.get_issue_comments(run.item.issue_number()).await?;
            Ok((Vec::new(), clarification_answer(&comments)))
        }
        Flow::New | Flow::Blocked => Ok((Vec::new(), None)),
    }
}

/// First string field present in `value`.
pub fn string_field(value: Option<&Value>, keys: &[&str]) -> Option<String> {
    let value = value?;
    keys.iter()
        .filter_map(|k| value[*k].as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn comment(author: &str, body: &str) -> Comment {
        Comment {
            id: 0,
            author: author.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_human_comments_skip_bots_and_markers() {
        let comments = vec![
            comment("alice", "Please use tabs"),
            comment("agent-workflow[bot]", "Design updated"),
            comment("bob", "<!-- agent-workflow:artifacts -->\n| ..."),
        ];
        let humans = human_comments(&comments);
        assert_eq!(humans.len(), 1);
        assert_eq!(humans[0].author, "alice");
    }

    #[test]
    fn test_own_notes_are_not_feedback_under_a_personal_token() {
        let question = ClarificationRequest {
            question: "Which locale?".to_string(),
            ..Default::default()
        };
        let comments = vec![
            comment("maintainer", &question.to_comment()),
            comment("maintainer", &tool_note("Phase 1/2 is done on `feature/issue-3-phase-1`.")),
            comment("maintainer", "Please also cover the empty state"),
        ];
        let humans = human_comments(&comments);
        assert_eq!(humans.len(), 1);
        assert_eq!(humans[0].body, "Please also cover the empty state");
    }

    #[test]
    fn test_clarification_answer_uses_replies_after_last_question() {
        let asked = |q: &str| {
            ClarificationRequest {
                question: q.to_string(),
                ..Default::default()
            }
            .to_comment()
        };
        let comments = vec![
            comment("maintainer", &asked("old?")),
            comment("alice", "old answer"),
            comment("maintainer", &asked("CSV or JSON?")),
            comment("alice", "CSV please"),
        ];
        let answer = clarification_answer(&comments).unwrap();
        assert!(answer.contains("CSV or JSON?"));
        assert!(answer.contains("CSV please"));
        assert!(!answer.contains("old answer"));
    }

    #[test]
    fn test_clarification_answer_requires_reply() {
        let comments = vec![comment("agent-workflow[bot]", &format!("{CLARIFICATION_MARKER}\n## Clarification needed\n\nQ?"))];
        assert!(clarification_answer(&comments).is_none());
    }

    #[test]
    fn test_structured_output_falls_back_to_text() {
        let result = AgentRunResult {
            success: true,
            content: Some("Done.\n```json\n{\"summary\": \"ok\"}\n```".to_string()),
            ..Default::default()
        };
        assert_eq!(structured_output(&result), Some(json!({"summary": "ok"})));
    }

    #[test]
    fn test_string_field_skips_blank() {
        let v = json!({"design": "  ", "summary": "short"});
        assert_eq!(string_field(Some(&v), &["design", "summary"]), Some("short".to_string()));
        assert_eq!(string_field(None, &["design"]), None);
    }
}
