//! The one failure path every workflow goes through.

use std::future::Future;
use std::pin::Pin;

use crate::error::{AppError, Result};
use crate::logging::{ExecutionSummary, LogContext};
use crate::notify::Notification;
use crate::platform::types::WorkflowItem;
use crate::state::AppState;
use crate::workflow::issue_ref;

pub type CleanupFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Failed item result as reported to the batch runner.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowFailure {
    pub error: String,
}

/// Record a failed item: fatal log entry, cleanup, closing summary, and an
/// error notification unless `dry_run`. Cleanup errors are logged and
/// dropped.
pub async fn handle_workflow_error(
    state: &AppState,
    ctx: &LogContext,
    item: &WorkflowItem,
    error: &AppError,
    dry_run: bool,
    cleanup: Option<CleanupFuture<'_>>,
) -> WorkflowFailure {
    let message = error.to_string();

    state.logger.log_error(ctx, &message, true);

    if let Some(cleanup) = cleanup {
        if let Err(e) = cleanup.await {
            tracing::warn!(issue = ctx.issue_number, error = %e, "Cleanup after failure failed");
        }
    }

    state.logger.log_execution_end(ctx, &ExecutionSummary::failed(&message));

    if !dry_run {
        state.notifier.notify(Notification::AgentError {
            issue: issue_ref(item),
            workflow: ctx.workflow.clone(),
            phase: ctx.phase.clone(),
            error: message.clone(),
        });
    }

    tracing::error!(
        issue = ctx.issue_number,
        workflow = %ctx.workflow,
        error = %message,
        "Workflow failed"
    );
    WorkflowFailure { error: message }
}
