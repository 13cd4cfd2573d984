//! Batch processing: select eligible items, lock each one, run the workflow,
//! tally the results.

use crate::error::{AppError, Result};
use crate::logging::LogContext;
use crate::notify::Notification;
use crate::platform::types::{ItemFilter, WorkflowItem};
use crate::state::AppState;
use crate::workflow::error::handle_workflow_error;
use crate::workflow::types::{Flow, Partition};
use crate::workflow::{BatchOptions, ItemOutcome, ItemRun, Workflow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Locked by another run, or selected by `--id` at the wrong status.
    pub skipped: usize,
}

async fn select_items(
    state: &AppState,
    workflow: &dyn Workflow,
    options: &BatchOptions,
) -> Result<Option<Vec<WorkflowItem>>> {
    let Some(id) = options.id.as_deref() else {
        let items = state
            .project
            .list_items(&ItemFilter::statuses(workflow.statuses()))
            .await?;
        return Ok(Some(items));
    };

    let item = state
        .project
        .get_item(id)
        .await?
        .ok_or_else(|| AppError::Config(format!("Project item {id} not found")))?;

    if !workflow.statuses().contains(&item.status) {
        println!(
            "Item {id} (#{}) is at status \"{}\", not handled by {}; skipping",
            item.issue_number(),
            item.status,
            workflow.name()
        );
        return Ok(None);
    }
    Ok(Some(vec![item]))
}

/// Eligible items with their flow, in query order. Blocked items are
/// reported and dropped here.
async fn eligible_items(
    state: &AppState,
    workflow: &dyn Workflow,
    items: Vec<WorkflowItem>,
    limit: Option<usize>,
) -> Result<Vec<(WorkflowItem, Flow)>> {
    let partition = Partition::build(items.clone(), |i| workflow.classify(i));
    println!(
        "{}: {} new, {} feedback, {} clarification, {} blocked",
        workflow.name(),
        partition.new.len(),
        partition.feedback.len(),
        partition.clarification.len(),
        partition.blocked.len()
    );
    for item in &partition.blocked {
        tracing::info!(
            issue = item.issue_number(),
            item_id = %item.id,
            "Waiting for clarification, skipping"
        );
    }

    let mut selected = Vec::new();
    for item in items {
        let Some(flow) = workflow.classify(&item) else {
            continue;
        };
        if flow == Flow::Blocked {
            continue;
        }
        if !workflow.is_pending(state, &item).await? {
            tracing::debug!(issue = item.issue_number(), "Nothing pending, skipping");
            continue;
        }
        selected.push((item, flow));
        if limit.is_some_and(|l| selected.len() >= l) {
            break;
        }
    }
    Ok(selected)
}

/// Run `workflow` over every eligible item.
///
/// Per-item failures are recorded through the shared error handler and
/// counted; only selection errors are returned.
pub async fn run_batch(
    state: &AppState,
    workflow: &dyn Workflow,
    options: &BatchOptions,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();

    let Some(items) = select_items(state, workflow, options).await? else {
        summary.skipped = 1;
        return Ok(summary);
    };
    let queue = eligible_items(state, workflow, items, options.limit).await?;

    if queue.is_empty() {
        println!("No items to process");
        return Ok(summary);
    }
    if options.dry_run {
        println!("[dry-run] No changes will be made");
    }

    for (item, flow) in &queue {
        let issue = item.issue_number();
        let guard = match state.locks.try_acquire(&item.id) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::info!(issue, item_id = %item.id, "Item locked by another run, skipping");
                println!("#{issue}: locked by another run, skipping");
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(issue, error = %e, "Could not acquire item lock, skipping");
                println!("#{issue}: Failed: {e}");
                summary.failed += 1;
                continue;
            }
        };

        println!("#{issue} {} ({})", item.content.title, flow.mode());
        let name = workflow.name();
        let ctx = LogContext::new(item, name.as_str(), name.phase_label()).with_mode(flow.mode());
        state.logger.log_execution_start(&ctx);

        let run = ItemRun::new(state, item, *flow, options, &ctx);
        match workflow.process(&run).await {
            Ok(outcome) => {
                state.logger.log_execution_end(&ctx, &run.execution_summary());
                match outcome {
                    ItemOutcome::Completed(Some(text)) => println!("  Done: {}", first_line(&text)),
                    ItemOutcome::Completed(None) => println!("  Done"),
                    ItemOutcome::ClarificationRequested => println!("  Waiting for clarification"),
                }
                summary.succeeded += 1;
            }
            Err(e) => {
                let failure = handle_workflow_error(
                    state,
                    &ctx,
                    item,
                    &e,
                    options.dry_run,
                    Some(workflow.cleanup(state)),
                )
                .await;
                println!("  Failed: {}", failure.error);
                summary.failed += 1;
            }
        }
        summary.processed += 1;
        drop(guard);
    }

    println!(
        "Processed {}: {} succeeded, {} failed, {} skipped",
        summary.processed, summary.succeeded, summary.failed, summary.skipped
    );

    if summary.processed > 1 && !options.dry_run {
        state.notifier.notify(Notification::BatchComplete {
            workflow: workflow.name().to_string(),
            processed: summary.processed,
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
        });
    }
    Ok(summary)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
