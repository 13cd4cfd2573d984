//! Human-in-the-loop notifications.
//!
//! Workflows call [`NotificationService::notify`], which returns at once;
//! delivery, retries and failure logging happen on a detached task.

pub mod telegram;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::artifact::DesignKind;
use crate::config::TelegramConfig;
use crate::error::Result;
use crate::parse::{PhaseProgress, ReviewDecision};
use crate::store::TriageFields;

pub use telegram::TelegramTransport;

/// Issue identity carried by most notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRef {
    pub number: u64,
    pub title: String,
    pub url: String,
    /// Project item id, used in button callbacks.
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DesignReady {
        issue: IssueRef,
        kind: DesignKind,
        summary: Option<String>,
    },
    InvestigationReady {
        issue: IssueRef,
        summary: Option<String>,
    },
    PrReady {
        issue: IssueRef,
        pr_number: u64,
        pr_url: String,
    },
    PrUpdated {
        issue: IssueRef,
        pr_number: u64,
        pr_url: String,
    },
    PhaseAdvanced {
        issue: IssueRef,
        completed: PhaseProgress,
        next: PhaseProgress,
        branch: String,
    },
    NeedsClarification {
        issue: IssueRef,
        workflow: String,
        question: String,
    },
    ReviewPosted {
        issue: IssueRef,
        pr_number: u64,
        pr_url: String,
        decision: ReviewDecision,
    },
    TriageComplete {
        issue: IssueRef,
        fields: TriageFields,
    },
    WorkflowReviewed {
        issue: IssueRef,
        summary: String,
    },
    AgentError {
        issue: IssueRef,
        workflow: String,
        phase: String,
        error: String,
    },
    BatchComplete {
        workflow: String,
        processed: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Url(String),
    Callback(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn url(label: &str, url: &str) -> Self {
        Self {
            label: label.to_string(),
            action: ButtonAction::Url(url.to_string()),
        }
    }

    pub fn callback(label: &str, data: String) -> Self {
        Self {
            label: label.to_string(),
            action: ButtonAction::Callback(data),
        }
    }
}

/// Rendered notification: HTML text plus rows of inline buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub text: String,
    pub parse_mode: &'static str,
    pub buttons: Vec<Vec<Button>>,
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Truncate at a UTF-8 boundary.
fn truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut pos = max_bytes;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    &s[..pos]
}

fn issue_line(issue: &IssueRef) -> String {
    format!("#{} {}", issue.number, escape_html(&issue.title))
}

fn review_buttons(issue: &IssueRef) -> Vec<Vec<Button>> {
    vec![
        vec![
            Button::callback("Approve", format!("approve:{}", issue.item_id)),
            Button::callback("Request changes", format!("changes:{}", issue.item_id)),
        ],
        vec![Button::url("View issue", &issue.url)],
    ]
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::DesignReady { .. } => "design-ready",
            Notification::InvestigationReady { .. } => "investigation-ready",
            Notification::PrReady { .. } => "pr-ready",
            Notification::PrUpdated { .. } => "pr-updated",
            Notification::PhaseAdvanced { .. } => "phase-advanced",
            Notification::NeedsClarification { .. } => "needs-clarification",
            Notification::ReviewPosted { .. } => "review-posted",
            Notification::TriageComplete { .. } => "triage-complete",
            Notification::WorkflowReviewed { .. } => "workflow-reviewed",
            Notification::AgentError { .. } => "agent-error",
            Notification::BatchComplete { .. } => "batch-complete",
        }
    }

    /// Informational messages go to the info channel; everything that asks
    /// for a decision goes to the admin.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            Notification::BatchComplete { .. }
                | Notification::TriageComplete { .. }
                | Notification::WorkflowReviewed { .. }
        )
    }

    pub fn to_message(&self) -> NotificationMessage {
        let (text, buttons) = match self {
            Notification::DesignReady { issue, kind, summary } => {
                let mut text = format!("📝 <b>{} ready for review</b>\n{}", kind.title(), issue_line(issue));
                if let Some(summary) = summary {
                    text.push_str(&format!("\n\n{}", escape_html(truncate(summary, 500))));
                }
                (text, review_buttons(issue))
            }
            Notification::InvestigationReady { issue, summary } => {
                let mut text = format!("🔍 <b>Bug investigation ready</b>\n{}", issue_line(issue));
                if let Some(summary) = summary {
                    text.push_str(&format!("\n\n{}", escape_html(truncate(summary, 500))));
                }
                (text, review_buttons(issue))
            }
            Notification::PrReady { issue, pr_number, pr_url } => (
                format!("🚀 <b>PR #{pr_number} ready for review</b>\n{}", issue_line(issue)),
                vec![vec![Button::url("View PR", pr_url), Button::url("View issue", &issue.url)]],
            ),
            Notification::PrUpdated { issue, pr_number, pr_url } => (
                format!("🔁 <b>PR #{pr_number} updated with requested changes</b>\n{}", issue_line(issue)),
                vec![vec![Button::url("View PR", pr_url)]],
            ),
            Notification::PhaseAdvanced {
                issue,
                completed,
                next,
                branch,
            } => (
                format!(
                    "✅ <b>Phase {completed} complete</b>\n{}\n\nNext: phase {next}\nBranch: <code>{}</code>",
                    issue_line(issue),
                    escape_html(branch)
                ),
                vec![vec![Button::url("View issue", &issue.url)]],
            ),
            Notification::NeedsClarification {
                issue,
                workflow,
                question,
            } => (
                format!(
                    "❓ <b>Clarification needed</b> ({})\n{}\n\n{}",
                    escape_html(workflow),
                    issue_line(issue),
                    escape_html(truncate(question, 1_000))
                ),
                vec![vec![
                    Button::url("Answer on GitHub", &issue.url),
                    Button::callback("Answered", format!("clarified:{}", issue.item_id)),
                ]],
            ),
            Notification::ReviewPosted {
                issue,
                pr_number,
                pr_url,
                decision,
            } => (
                format!(
                    "👀 <b>Review posted on PR #{pr_number}</b>: {}\n{}",
                    decision.label(),
                    issue_line(issue)
                ),
                vec![vec![Button::url("View PR", pr_url)]],
            ),
            Notification::TriageComplete { issue, fields } => {
                let field = |v: &Option<String>| v.as_deref().map(escape_html).unwrap_or_else(|| "?".to_string());
                (
                    format!(
                        "🏷 <b>Triaged</b> {}\nDomain: {} · Priority: {} · Size: {} · Complexity: {}",
                        issue_line(issue),
                        field(&fields.domain),
                        field(&fields.priority),
                        field(&fields.size),
                        field(&fields.complexity),
                    ),
                    vec![vec![Button::url("View issue", &issue.url)]],
                )
            }
            Notification::WorkflowReviewed { issue, summary } => (
                format!(
                    "🧭 <b>Workflow reviewed</b> {}\n\n{}",
                    issue_line(issue),
                    escape_html(truncate(summary, 500))
                ),
                vec![vec![Button::url("View issue", &issue.url)]],
            ),
            Notification::AgentError {
                issue,
                workflow,
                phase,
                error,
            } => (
                format!(
                    "❌ <b>{} failed</b> ({})\n{}\n\nError: {}",
                    escape_html(phase),
                    escape_html(workflow),
                    issue_line(issue),
                    escape_html(truncate(error, 500))
                ),
                vec![vec![Button::url("View issue", &issue.url)]],
            ),
            Notification::BatchComplete {
                workflow,
                processed,
                succeeded,
                failed,
                skipped,
            } => (
                format!(
                    "📊 <b>{} batch complete</b>\nProcessed: {processed} · Succeeded: {succeeded} · Failed: {failed} · Skipped: {skipped}",
                    escape_html(workflow)
                ),
                Vec::new(),
            ),
        };

        NotificationMessage {
            text,
            parse_mode: "HTML",
            buttons: drop_empty_links(buttons),
        }
    }
}

/// Items without a known URL would render dead link buttons.
fn drop_empty_links(rows: Vec<Vec<Button>>) -> Vec<Vec<Button>> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|b| !matches!(&b.action, ButtonAction::Url(u) if u.is_empty()))
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect()
}

/// Message delivery backend.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_to_admin(&self, message: &NotificationMessage) -> Result<()>;

    async fn send_to_info_channel(&self, message: &NotificationMessage) -> Result<()>;
}

/// Drops every message. Used when Telegram is disabled.
pub struct NoopTransport;

#[async_trait]
impl NotificationTransport for NoopTransport {
    async fn send_to_admin(&self, _message: &NotificationMessage) -> Result<()> {
        Ok(())
    }

    async fn send_to_info_channel(&self, _message: &NotificationMessage) -> Result<()> {
        Ok(())
    }
}

/// Backoff for failed deliveries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Doubled after every failed attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl From<&TelegramConfig> for RetryConfig {
    fn from(config: &TelegramConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            ..Default::default()
        }
    }
}

/// Attempt 0 waits `base_delay`, attempt 1 twice that, and so on.
fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = config
        .base_delay
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    delay.min(config.max_delay)
}

async fn deliver(
    transport: &dyn NotificationTransport,
    retry: &RetryConfig,
    notification: &Notification,
) -> Result<()> {
    let message = notification.to_message();
    let mut attempt = 0;
    loop {
        let sent = if notification.is_informational() {
            transport.send_to_info_channel(&message).await
        } else {
            transport.send_to_admin(&message).await
        };
        match sent {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < retry.max_attempts => {
                let delay = compute_delay(retry, attempt);
                tracing::debug!(
                    kind = notification.kind(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Notification failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fire-and-forget dispatcher. Failures never reach the caller; they are
/// logged once retries are exhausted.
pub struct NotificationService {
    transport: Arc<dyn NotificationTransport>,
    retry: RetryConfig,
    tasks: Mutex<JoinSet<()>>,
}

impl NotificationService {
    pub fn new(transport: Arc<dyn NotificationTransport>, retry: RetryConfig) -> Self {
        Self {
            transport,
            retry,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let transport: Arc<dyn NotificationTransport> = if config.enabled {
            Arc::new(TelegramTransport::new(config)?)
        } else {
            Arc::new(NoopTransport)
        };
        Ok(Self::new(transport, RetryConfig::from(config)))
    }

    /// Queue a notification. Must be called inside a tokio runtime.
    pub fn notify(&self, notification: Notification) {
        let transport = Arc::clone(&self.transport);
        let retry = self.retry.clone();
        let Ok(mut tasks) = self.tasks.lock() else {
            tracing::warn!(kind = notification.kind(), "Notification task set poisoned, dropping");
            return;
        };
        tasks.spawn(async move {
            if let Err(e) = deliver(transport.as_ref(), &retry, &notification).await {
                tracing::warn!(
                    kind = notification.kind(),
                    attempts = retry.max_attempts,
                    error = %e,
                    "Notification could not be delivered"
                );
            }
        });
    }

    /// Wait, at most `timeout`, for queued notifications.
    pub async fn flush(&self, timeout: Duration) {
        let mut tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        let drained = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(pending = tasks.len(), "Timed out delivering notifications");
        }
    }
}
