//! Triage: estimate domain, priority, size and complexity for backlog items
//! that have none yet.

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::prompt::triage_prompt;
use crate::artifact::comments::upsert_marked_comment;
use crate::error::{AppError, Result};
use crate::notify::Notification;
use crate::platform::types::{Status, WorkflowItem};
use crate::state::AppState;
use crate::store::TriageFields;
use crate::workflow::{
    issue_ref, run_agent, schema, string_field, structured_output, AgentCall, Flow, ItemOutcome, ItemRun,
    Workflow, WorkflowName,
};

pub const TRIAGE_MARKER: &str = "<!-- agent-workflow:triage -->";

pub struct Triage;

fn triage_fields(structured: Option<&Value>) -> Result<TriageFields> {
    let fields = TriageFields {
        domain: string_field(structured, &["domain"]),
        priority: string_field(structured, &["priority"]).map(|p| p.to_lowercase()),
        size: string_field(structured, &["size"]).map(|s| s.to_uppercase()),
        complexity: string_field(structured, &["complexity"]).map(|c| c.to_lowercase()),
    };
    if fields.priority.is_none() {
        return Err(AppError::Parse("triage answer has no priority".to_string()));
    }
    Ok(fields)
}

fn triage_comment(fields: &TriageFields, summary: Option<&str>) -> String {
    let cell = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let mut body = format!(
        "{TRIAGE_MARKER}\n## Triage\n\n| Domain | Priority | Size | Complexity |\n|---|---|---|---|\n| {} | {} | {} | {} |\n",
        cell(&fields.domain),
        cell(&fields.priority),
        cell(&fields.size),
        cell(&fields.complexity),
    );
    if let Some(summary) = summary {
        body.push_str(&format!("\n{}\n", summary.trim()));
    }
    body
}

#[async_trait]
impl Workflow for Triage {
    fn name(&self) -> WorkflowName {
        WorkflowName::Triage
    }

    fn statuses(&self) -> &'static [Status] {
        &[Status::Backlog]
    }

    /// Triage does not go through human review.
    fn classify(&self, _item: &WorkflowItem) -> Option<Flow> {
        Some(Flow::New)
    }

    async fn is_pending(&self, state: &AppState, item: &WorkflowItem) -> Result<bool> {
        let record = state.store.get(item.issue_number()).await?;
        Ok(record.and_then(|r| r.triage.priority).is_none())
    }

    async fn process(&self, run: &ItemRun<'_>) -> Result<ItemOutcome> {
        let state = run.state;
        let item = run.item;
        let issue = item.issue_number();

        let prompt = triage_prompt(&state.repo_full_name(), item);
        let call = AgentCall {
            schema: Some(schema::triage()),
            allow_write: false,
        };
        let result = run_agent(run, self.name(), prompt, call).await?;
        let structured = structured_output(&result);
        let fields = triage_fields(structured.as_ref())?;
        let summary = string_field(structured.as_ref(), &["summary"]);

        if run.options.dry_run {
            state.logger.log_dry_run(
                run.ctx,
                &format!(
                    "record triage for #{issue}: priority {}, size {}",
                    fields.priority.as_deref().unwrap_or("-"),
                    fields.size.as_deref().unwrap_or("-")
                ),
            );
            return Ok(ItemOutcome::Completed(summary));
        }

        state.store.update_triage(issue, &fields).await?;
        upsert_marked_comment(
            state.project.as_ref(),
            issue,
            TRIAGE_MARKER,
            &triage_comment(&fields, summary.as_deref()),
        )
        .await?;
        state.logger.log_github_action(run.ctx, "Posted triage", &format!("#{issue}"));

        state.notifier.notify(Notification::TriageComplete {
            issue: issue_ref(item),
            fields,
        });
        Ok(ItemOutcome::Completed(summary))
    }
}
