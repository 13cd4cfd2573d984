//! Product development, product design and technical design workflows.
//!
//! All three produce a markdown document: it is committed under the
//! design-docs directory on the issue's docs branch, mirrored into the
//! issue body, and indexed in the artifact comment. The technical design
//! also yields the implementation phase list.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::agent::prompt::{design_prompt, FeedbackContext};
use crate::artifact::branch::docs_branch;
use crate::artifact::comments::{
    find_marked_comment, render_phase_comment, render_single_phase_comment, upsert_artifact, upsert_marked_comment,
    ArtifactEntry, PHASES_MARKER,
};
use crate::artifact::DesignKind;
use crate::error::{AppError, Result};
use crate::notify::Notification;
use crate::parse::phase::{parse_phases_from_markdown, validate_phases};
use crate::parse::{build_updated_issue_body, extract_markdown, ImplementationPhase};
use crate::platform::types::{ReviewStatus, Status};
use crate::state::AppState;
use crate::workflow::{
    clarification_in, gather_feedback, issue_ref, request_clarification, run_agent, schema,
    set_review_status, string_field, structured_output, AgentCall, Flow, ItemOutcome, ItemRun,
    Workflow, WorkflowName,
};

pub struct DesignWorkflow {
    kind: DesignKind,
}

impl DesignWorkflow {
    pub fn new(kind: DesignKind) -> Self {
        Self { kind }
    }

    /// Approved documents this one builds on.
    fn upstream_kinds(&self) -> &'static [DesignKind] {
        match self.kind {
            DesignKind::ProductDevelopment => &[],
            DesignKind::ProductDesign => &[DesignKind::ProductDevelopment],
            DesignKind::TechDesign => &[DesignKind::ProductDevelopment, DesignKind::ProductDesign],
        }
    }

    async fn commit_document(&self, run: &ItemRun<'_>, design: &str) -> Result<String> {
        let state = run.state;
        let ws = &state.workspace;
        let issue = run.item.issue_number();
        let branch = docs_branch(issue);

        ws.prepare_branch(&branch, ws.default_branch()).await?;
        let path = state.designs.write(issue, self.kind, design).await?;
        let message = format!("docs: {} for #{issue}", self.kind.title().to_lowercase());
        if ws.commit_all(&message).await? && !run.options.skip_push {
            ws.push(&branch, false).await?;
        }
        ws.return_to_default().await?;

        let path = path.to_string_lossy().replace('\\', "/");
        state
            .logger
            .log_github_action(run.ctx, "Committed design", &format!("`{path}` on `{branch}`"));
        Ok(path)
    }

    async fn publish_phases(&self, run: &ItemRun<'_>, phases: &[ImplementationPhase]) -> Result<()> {
        let state = run.state;
        let issue = run.item.issue_number();
        state.store.save_phases(issue, phases).await?;
        upsert_marked_comment(state.project.as_ref(), issue, PHASES_MARKER, &render_phase_comment(phases)).await?;
        state.logger.log_github_action(
            run.ctx,
            "Phases recorded",
            &format!("{} implementation phases", phases.len()),
        );
        Ok(())
    }

    /// Drop a phase list left over from an earlier revision of the design.
    async fn retract_phases(&self, run: &ItemRun<'_>) -> Result<()> {
        let state = run.state;
        let issue = run.item.issue_number();
        state.store.clear_phases(issue).await?;

        let comments = state.project.get_issue_comments(issue).await?;
        if let Some(existing) = find_marked_comment(&comments, PHASES_MARKER) {
            state
                .project
                .update_issue_comment(existing.id, &render_single_phase_comment())
                .await?;
            state
                .logger
                .log_github_action(run.ctx, "Phases retracted", "design has a single phase");
        }
        Ok(())
    }
}

/// Phase list from the structured answer, else from the document's
/// `Phase N:` headings.
fn phases_from_answer(structured: Option<&Value>, design: &str) -> Option<Vec<ImplementationPhase>> {
    structured
        .and_then(|v| v.get("phases"))
        .filter(|p| p.as_array().is_some_and(|a| !a.is_empty()))
        .and_then(|p| serde_json::from_value::<Vec<ImplementationPhase>>(p.clone()).ok())
        .or_else(|| parse_phases_from_markdown(design))
}

#[async_trait]
impl Workflow for DesignWorkflow {
    fn name(&self) -> WorkflowName {
        match self.kind {
            DesignKind::ProductDevelopment => WorkflowName::ProductDevelopment,
            DesignKind::ProductDesign => WorkflowName::ProductDesign,
            DesignKind::TechDesign => WorkflowName::TechDesign,
        }
    }

    fn statuses(&self) -> &'static [Status] {
        match self.kind {
            DesignKind::ProductDevelopment => &[Status::ProductDevelopment],
            DesignKind::ProductDesign => &[Status::ProductDesign],
            DesignKind::TechDesign => &[Status::TechDesign],
        }
    }

    fn requires_clean_tree(&self) -> bool {
        true
    }

    async fn process(&self, run: &ItemRun<'_>) -> Result<ItemOutcome> {
        let state = run.state;
        let item = run.item;
        let issue = item.issue_number();
        let body = &item.content.body;

        let mut upstream = Vec::new();
        for kind in self.upstream_kinds() {
            if let Some(doc) = state.designs.load(issue, *kind, body).await {
                upstream.push((*kind, doc));
            }
        }
        let previous = match run.flow {
            Flow::Feedback | Flow::Clarification => state.designs.load(issue, self.kind, body).await,
            Flow::New | Flow::Blocked => None,
        };
        let (comments, clarification) = gather_feedback(run).await?;
        let feedback = FeedbackContext {
            previous: previous.as_deref(),
            comments: &comments,
            clarification: clarification.as_deref(),
        };

        let prompt = design_prompt(&state.repo_full_name(), self.kind, item, &upstream, &feedback);
        let call = AgentCall {
            schema: Some(schema::design(self.kind == DesignKind::TechDesign)),
            allow_write: false,
        };
        let result = run_agent(run, self.name(), prompt, call).await?;
        let structured = structured_output(&result);

        if let Some(request) = clarification_in(&result, structured.as_ref()) {
            return request_clarification(run, self.name(), &request).await;
        }

        let design = string_field(structured.as_ref(), &["design"])
            .or_else(|| result.content.as_deref().and_then(extract_markdown))
            .ok_or_else(|| AppError::Parse(format!("no {} document in agent output", self.kind.title())))?;
        let summary = string_field(structured.as_ref(), &["summary"]);

        let phases = match self.kind {
            DesignKind::TechDesign => phases_from_answer(structured.as_ref(), &design),
            _ => None,
        };
        if let Some(phases) = &phases {
            validate_phases(phases)?;
        }

        if run.options.dry_run {
            let path = state.designs.relative_path(issue, self.kind);
            state.logger.log_dry_run(
                run.ctx,
                &format!(
                    "write `{}`, update the issue body and set review status to {}",
                    path.display(),
                    ReviewStatus::WaitingForReview
                ),
            );
            if let Some(phases) = &phases {
                state
                    .logger
                    .log_dry_run(run.ctx, &format!("record {} implementation phases", phases.len()));
            }
            return Ok(ItemOutcome::Completed(summary));
        }

        let path = self.commit_document(run, &design).await?;

        let updated = build_updated_issue_body(body, self.kind.section(), &design);
        if updated != *body {
            state.project.update_issue_body(issue, &updated).await?;
            state.logger.log_github_action(run.ctx, "Updated issue body", self.kind.title());
        }
        upsert_artifact(
            state.project.as_ref(),
            issue,
            ArtifactEntry {
                kind: self.kind,
                path,
                status: ReviewStatus::WaitingForReview.to_string(),
                updated: Utc::now().format("%Y-%m-%d").to_string(),
            },
        )
        .await?;

        if self.kind == DesignKind::TechDesign {
            match phases.as_deref().filter(|p| p.len() > 1) {
                Some(phases) => self.publish_phases(run, phases).await?,
                None => self.retract_phases(run).await?,
            }
        }

        set_review_status(run, ReviewStatus::WaitingForReview).await?;
        state.notifier.notify(Notification::DesignReady {
            issue: issue_ref(item),
            kind: self.kind,
            summary: summary.clone(),
        });
        Ok(ItemOutcome::Completed(summary))
    }

    async fn cleanup(&self, state: &AppState) -> Result<()> {
        state.workspace.return_to_default().await
    }
}
