//! Implementation: write the code for an approved design on a deterministic
//! branch, one phase at a time for large features, and open the pull
//! request once the last phase is done.

use async_trait::async_trait;

use crate::agent::prompt::{implementation_prompt, FeedbackContext, ImplementationContext};
use crate::artifact::branch::{feature_branch, phase_base_branch};
use crate::artifact::{resolve_phase_details, DesignKind, PhaseQuery};
use crate::error::{AppError, Result};
use crate::notify::Notification;
use crate::parse::phase::validate_phases;
use crate::parse::{parse_phase_string, ImplementationPhase, PhaseProgress};
use crate::platform::types::{CreatePullRequest, PullRequest, ReviewStatus, Status, WorkflowItem};
use crate::state::AppState;
use crate::workflow::{
    clarification_in, classify_review_status, gather_feedback, issue_ref, request_clarification, run_agent,
    schema, set_review_status, string_field, structured_output, tool_note, AgentCall, Flow, ItemOutcome,
    ItemRun, Workflow, WorkflowName,
};

pub struct Implement;

/// Where the item stands in its phase sequence.
#[derive(Debug, Clone, PartialEq)]
struct PhasePlan {
    progress: Option<PhaseProgress>,
    phases: Vec<ImplementationPhase>,
}

impl PhasePlan {
    fn current(&self) -> Option<(&ImplementationPhase, PhaseProgress)> {
        let progress = self.progress?;
        self.phases
            .iter()
            .find(|p| p.order == progress.current)
            .map(|p| (p, progress))
    }
}

/// Combine the board's `N/M` with the resolved phase list.
///
/// A stored total that disagrees with the resolved list fails fast. Without
/// a stored value, a list of more than one phase starts at phase 1.
fn plan_phases(stored: &str, resolved: Option<Vec<ImplementationPhase>>) -> Result<PhasePlan> {
    let stored = stored.trim();
    let progress = if stored.is_empty() {
        None
    } else {
        Some(
            parse_phase_string(stored)
                .ok_or_else(|| AppError::Phase(format!("invalid implementation phase \"{stored}\"")))?,
        )
    };

    let phases = match resolved {
        Some(phases) => {
            validate_phases(&phases)?;
            phases
        }
        None => Vec::new(),
    };

    match progress {
        Some(p) if !phases.is_empty() && phases.len() as u32 != p.total => Err(AppError::Phase(format!(
            "implementation phase is {p} but the design now has {} phases",
            phases.len()
        ))),
        Some(p) => Ok(PhasePlan {
            progress: Some(p),
            phases,
        }),
        None if phases.len() > 1 => Ok(PhasePlan {
            progress: PhaseProgress::new(1, phases.len() as u32),
            phases,
        }),
        None => Ok(PhasePlan {
            progress: None,
            phases: Vec::new(),
        }),
    }
}

fn pr_body(item: &WorkflowItem, description: Option<&str>, plan: &PhasePlan) -> String {
    let mut body = description
        .map(str::to_string)
        .unwrap_or_else(|| format!("Implements #{}: {}", item.issue_number(), item.content.title));
    if plan.phases.len() > 1 {
        body.push_str("\n\n## Phases\n");
        for phase in &plan.phases {
            body.push_str(&format!("- [x] Phase {}/{}: {}\n", phase.order, phase.total, phase.title));
        }
    }
    body.push_str(&format!("\n\nCloses #{}", item.issue_number()));
    body
}

impl Implement {
    async fn resolve_plan(&self, run: &ItemRun<'_>) -> Result<PhasePlan> {
        let state = run.state;
        let item = run.item;
        let resolved = resolve_phase_details(
            &state.phase_sources,
            PhaseQuery {
                issue_number: item.issue_number(),
                issue_body: &item.content.body,
            },
        )
        .await;
        let plan = plan_phases(&item.implementation_phase, resolved.map(|r| r.phases))?;

        if item.implementation_phase.trim().is_empty() {
            if let Some(progress) = plan.progress {
                if run.options.dry_run {
                    state
                        .logger
                        .log_dry_run(run.ctx, &format!("set implementation phase to {progress}"));
                } else {
                    state
                        .project
                        .set_implementation_phase(&item.id, &progress.to_string())
                        .await?;
                    state.logger.log_status_transition(run.ctx, "(no phase)", &progress.to_string());
                }
            }
        }
        Ok(plan)
    }

    /// The branch to work on and the branch it starts from.
    async fn branches(&self, run: &ItemRun<'_>, plan: &PhasePlan, pr: Option<&PullRequest>) -> Result<(String, String)> {
        let ws = &run.state.workspace;
        let issue = run.item.issue_number();
        if let Some(pr) = pr {
            return Ok((pr.head_branch.clone(), ws.default_branch().to_string()));
        }

        let (branch, base) = match plan.progress {
            Some(p) => (
                feature_branch(issue, Some(p.current)),
                phase_base_branch(issue, p.current, ws.default_branch()),
            ),
            None => (feature_branch(issue, None), ws.default_branch().to_string()),
        };
        if run.flow == Flow::Feedback && !ws.branch_exists(&branch).await? {
            return Err(AppError::Workspace(format!(
                "changes requested on #{issue} but there is no open PR or branch `{branch}`"
            )));
        }
        Ok((branch, base))
    }

    async fn advance_phase(&self, run: &ItemRun<'_>, completed: PhaseProgress, next: PhaseProgress, branch: &str) -> Result<()> {
        let state = run.state;
        let item = run.item;

        state.project.set_implementation_phase(&item.id, &next.to_string()).await?;
        if state.project.has_review_status_field() {
            state.project.clear_item_review_status(&item.id).await?;
        }
        state.project.update_item_status(&item.id, Status::Implementation).await?;
        state
            .logger
            .log_status_transition(run.ctx, &completed.to_string(), &next.to_string());

        state
            .project
            .add_issue_comment(
                item.issue_number(),
                &tool_note(&format!("Phase {completed} is done on `{branch}`. Phase {next} will build on it.")),
            )
            .await?;

        state.notifier.notify(Notification::PhaseAdvanced {
            issue: issue_ref(item),
            completed,
            next,
            branch: branch.to_string(),
        });
        Ok(())
    }

    async fn open_pull_request(
        &self,
        run: &ItemRun<'_>,
        plan: &PhasePlan,
        branch: &str,
        description: Option<&str>,
    ) -> Result<PullRequest> {
        let state = run.state;
        let item = run.item;
        let issue = item.issue_number();

        let pr = match state.project.find_open_pr_for_issue(issue).await? {
            Some(existing) => existing,
            None => {
                let pr = state
                    .project
                    .create_pull_request(&CreatePullRequest {
                        title: format!("#{issue}: {}", item.content.title),
                        body: pr_body(item, description, plan),
                        head_branch: branch.to_string(),
                        base_branch: state.workspace.default_branch().to_string(),
                    })
                    .await?;
                state
                    .logger
                    .log_github_action(run.ctx, "Opened pull request", &format!("#{} {}", pr.number, pr.url));
                pr
            }
        };

        if plan.progress.is_some() {
            state.project.clear_implementation_phase(&item.id).await?;
        }
        state.project.update_item_status(&item.id, Status::PrReview).await?;
        state
            .logger
            .log_status_transition(run.ctx, &item.status.to_string(), &Status::PrReview.to_string());
        set_review_status(run, ReviewStatus::WaitingForReview).await?;

        state.notifier.notify(Notification::PrReady {
            issue: issue_ref(item),
            pr_number: pr.number,
            pr_url: pr.url.clone(),
        });
        Ok(pr)
    }
}

#[async_trait]
impl Workflow for Implement {
    fn name(&self) -> WorkflowName {
        WorkflowName::Implement
    }

    fn statuses(&self) -> &'static [Status] {
        &[Status::Implementation, Status::PrReview]
    }

    /// Items at PR review come back only when a reviewer asked for changes.
    fn classify(&self, item: &WorkflowItem) -> Option<Flow> {
        match item.status {
            Status::Implementation => classify_review_status(item.review_status),
            Status::PrReview if item.review_status == ReviewStatus::RequestChanges => Some(Flow::Feedback),
            _ => None,
        }
    }

    fn requires_clean_tree(&self) -> bool {
        true
    }

    async fn process(&self, run: &ItemRun<'_>) -> Result<ItemOutcome> {
        let state = run.state;
        let item = run.item;
        let issue = item.issue_number();
        let ws = &state.workspace;

        let plan = self.resolve_plan(run).await?;
        let pr = match run.flow {
            Flow::Feedback => state.project.find_open_pr_for_issue(issue).await?,
            _ => None,
        };
        let (branch, base) = self.branches(run, &plan, pr.as_ref()).await?;

        if run.options.dry_run {
            state
                .logger
                .log_dry_run(run.ctx, &format!("check out `{branch}` from `{base}`"));
        } else {
            if !run.options.skip_pull {
                ws.pull_default_branch().await?;
            }
            ws.prepare_branch(&branch, &base).await?;
        }

        let tech_design = state.designs.load(issue, DesignKind::TechDesign, &item.content.body).await;
        let product_design = state
            .designs
            .load(issue, DesignKind::ProductDesign, &item.content.body)
            .await;
        let review_comments = match &pr {
            Some(pr) => state.project.get_pr_review_comments(pr.number).await?,
            None => Vec::new(),
        };
        let (comments, clarification) = gather_feedback(run).await?;

        let context = ImplementationContext {
            tech_design: tech_design.as_deref(),
            product_design: product_design.as_deref(),
            phase: plan.current(),
            branch: &branch,
            review_comments: &review_comments,
        };
        let feedback = FeedbackContext {
            previous: None,
            comments: &comments,
            clarification: clarification.as_deref(),
        };
        let prompt = implementation_prompt(&state.repo_full_name(), item, &context, &feedback);
        let call = AgentCall {
            schema: Some(schema::implementation()),
            allow_write: !run.options.dry_run,
        };
        let result = run_agent(run, self.name(), prompt, call).await?;
        let structured = structured_output(&result);

        if let Some(request) = clarification_in(&result, structured.as_ref()) {
            if !run.options.dry_run {
                ws.return_to_default().await?;
            }
            return request_clarification(run, self.name(), &request).await;
        }

        let summary = string_field(structured.as_ref(), &["summary"]);
        match structured.as_ref().map(|v| v["success"].as_bool()) {
            Some(Some(true)) => {}
            Some(Some(false)) => {
                return Err(AppError::Agent(format!(
                    "agent reported the implementation failed: {}",
                    summary.as_deref().unwrap_or("no summary")
                )))
            }
            Some(None) => {
                return Err(AppError::Parse(
                    "implementation result has no `success` flag".to_string(),
                ))
            }
            None => return Err(AppError::Parse("no structured implementation result".to_string())),
        }

        if run.options.dry_run {
            let action = match (&pr, plan.progress) {
                (Some(pr), _) => format!("push `{branch}` and update PR #{}", pr.number),
                (None, Some(p)) if !p.is_last() => format!("push `{branch}` and advance to phase {}", p.current + 1),
                _ => format!("push `{branch}` and open a pull request"),
            };
            state.logger.log_dry_run(run.ctx, &action);
            return Ok(ItemOutcome::Completed(summary));
        }

        if !run.options.skip_local_test {
            ws.run_tests().await?;
        }

        let mut message = format!("feat: #{issue} {}", item.content.title);
        if let Some(p) = plan.progress {
            message.push_str(&format!(" (phase {p})"));
        }
        if let Some(s) = &summary {
            message.push_str(&format!("\n\n{s}"));
        }
        let committed = ws.commit_all(&message).await?;
        if !committed {
            if run.flow == Flow::New {
                return Err(AppError::Agent("agent finished without changing any files".to_string()));
            }
            tracing::warn!(issue, branch = %branch, "No changes after feedback run");
        }
        if !run.options.skip_push {
            ws.push(&branch, false).await?;
        }

        match (pr, plan.progress) {
            (Some(pr), _) => {
                let note = tool_note(&format!(
                    "Addressed the requested changes on `{branch}`.\n\n{}",
                    summary.as_deref().unwrap_or_default()
                ));
                state.project.add_issue_comment(pr.number, note.trim_end()).await?;
                set_review_status(run, ReviewStatus::WaitingForReview).await?;
                state.notifier.notify(Notification::PrUpdated {
                    issue: issue_ref(item),
                    pr_number: pr.number,
                    pr_url: pr.url,
                });
            }
            (None, Some(progress)) if !progress.is_last() => {
                let next = progress
                    .next()
                    .ok_or_else(|| AppError::Phase(format!("no phase after {progress}")))?;
                self.advance_phase(run, progress, next, &branch).await?;
            }
            (None, _) => {
                let description = string_field(structured.as_ref(), &["prDescription"]);
                self.open_pull_request(run, &plan, &branch, description.as_deref()).await?;
            }
        }

        ws.return_to_default().await?;
        Ok(ItemOutcome::Completed(summary))
    }

    async fn cleanup(&self, state: &AppState) -> Result<()> {
        state.workspace.return_to_default().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::types::ItemContent;

    fn phases(n: u32) -> Vec<ImplementationPhase> {
        (1..=n)
            .map(|order| ImplementationPhase {
                order,
                total: n,
                title: format!("Step {order}"),
                description: String::new(),
                files_affected: vec![],
            })
            .collect()
    }

    #[test]
    fn test_plan_starts_multi_phase_at_one() {
        let plan = plan_phases("", Some(phases(3))).unwrap();
        assert_eq!(plan.progress, PhaseProgress::new(1, 3));
        assert_eq!(plan.current().unwrap().0.title, "Step 1");
    }

    #[test]
    fn test_plan_single_phase_has_no_progress() {
        assert_eq!(plan_phases("", Some(phases(1))).unwrap().progress, None);
        assert_eq!(plan_phases("", None).unwrap().progress, None);
    }

    #[test]
    fn test_plan_keeps_stored_progress() {
        let plan = plan_phases("2/4", Some(phases(4))).unwrap();
        assert_eq!(plan.progress, PhaseProgress::new(2, 4));
        assert_eq!(plan.current().unwrap().0.title, "Step 2");
    }

    #[test]
    fn test_plan_rejects_changed_total() {
        let err = plan_phases("3/4", Some(phases(2))).unwrap_err();
        assert!(matches!(err, AppError::Phase(_)));
    }

    #[test]
    fn test_plan_rejects_garbage() {
        assert!(matches!(plan_phases("three", None), Err(AppError::Phase(_))));
        let mut gappy = phases(3);
        gappy[2].order = 4;
        assert!(matches!(plan_phases("", Some(gappy)), Err(AppError::Phase(_))));
    }

    #[test]
    fn test_pr_body_closes_issue() {
        let item = WorkflowItem {
            id: "PVTI_1".to_string(),
            content: ItemContent {
                number: 12,
                title: "Export".to_string(),
                body: String::new(),
                labels: vec![],
                item_type: crate::platform::types::ItemType::Feature,
                url: String::new(),
            },
            status: Status::Implementation,
            review_status: ReviewStatus::Empty,
            implementation_phase: String::new(),
        };
        let plan = plan_phases("", Some(phases(2))).unwrap();
        let body = pr_body(&item, Some("Adds CSV export."), &plan);
        assert!(body.starts_with("Adds CSV export."));
        assert!(body.contains("- [x] Phase 2/2: Step 2"));
        assert!(body.ends_with("Closes #12"));
        assert_eq!(crate::parse::extract::closing_issue_number(&body), Some(12));
    }
}
