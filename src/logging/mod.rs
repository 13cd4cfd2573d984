//! Per-issue execution logs.
//!
//! Every agent run against an issue appends human-readable markdown to
//! `issue-{N}.md` in the configured [`LogStore`]. Callers pass a
//! [`LogContext`] explicitly; there is no ambient "current log".

pub mod cost;
pub mod format;
pub mod store;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::agent::{AgentEvent, AgentRunResult, EventCallback, Usage};
use crate::config::LoggingConfig;
use crate::error::Result;
use crate::platform::types::{ItemType, WorkflowItem};
use cost::{update_cost_record, CostEntry};
use store::{LocalLogStore, LogStore, RemoteLogStore};

/// Correlates every entry written during one workflow run on one item.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub issue_number: u64,
    pub workflow: String,
    /// Heading for this run's section, e.g. "Technical Design".
    pub phase: String,
    pub mode: Option<String>,
    pub issue_title: String,
    pub issue_type: ItemType,
    pub start_time: DateTime<Utc>,
}

impl LogContext {
    pub fn new(item: &WorkflowItem, workflow: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            issue_number: item.issue_number(),
            workflow: workflow.into(),
            phase: phase.into(),
            mode: None,
            issue_title: item.content.title.clone(),
            issue_type: item.content.item_type,
            start_time: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// What `log_execution_end` records.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub success: bool,
    pub tool_calls: u32,
    pub usage: Usage,
    pub error: Option<String>,
}

impl ExecutionSummary {
    pub fn from_result(result: &AgentRunResult) -> Self {
        Self {
            success: result.success,
            tool_calls: result.tool_calls,
            usage: result.usage,
            error: result.error.clone(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

pub fn log_key(issue_number: u64) -> String {
    format!("issue-{issue_number}.md")
}

/// Writes execution log entries. Write failures are reported through
/// `tracing` and never returned.
pub struct ExecutionLogger {
    store: Arc<dyn LogStore>,
    tasks: Mutex<JoinSet<()>>,
}

impl ExecutionLogger {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Local files under `logging.dir`, or the remote object store when
    /// enabled (with `logging.dir` as its fallback). Must be called inside a
    /// tokio runtime when remote logging is on.
    pub fn from_config(config: &LoggingConfig) -> Result<Self> {
        let local = LocalLogStore::new(&config.dir);
        let store: Arc<dyn LogStore> = if config.remote.enabled {
            Arc::new(RemoteLogStore::new(&config.remote, local)?)
        } else {
            Arc::new(local)
        };
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    fn append(&self, ctx: &LogContext, text: &str) {
        if let Err(e) = self.store.append(&log_key(ctx.issue_number), text) {
            tracing::warn!(issue = ctx.issue_number, error = %e, "Failed to write execution log");
        }
    }

    fn entry(&self, ctx: &LogContext, title: &str, body: &str) {
        self.append(ctx, &format::entry(title, Utc::now(), body));
    }

    /// Starts the issue log on first use, then opens a section for this run.
    pub fn log_execution_start(&self, ctx: &LogContext) {
        let mut text = String::new();
        if !self.store.exists(&log_key(ctx.issue_number)) {
            text.push_str(&format::file_header(ctx));
        }
        text.push_str(&format::phase_header(ctx));
        self.append(ctx, &text);
    }

    pub fn log_prompt(&self, ctx: &LogContext, prompt: &str) {
        self.entry(ctx, "Prompt", &format::code_block("", prompt));
    }

    pub fn log_tool_call(&self, ctx: &LogContext, name: &str, input: &Value) {
        let input = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
        self.entry(
            ctx,
            &format!("Tool call: `{name}`"),
            &format::code_block("json", &format::truncate(&input, format::MAX_TOOL_OUTPUT)),
        );
    }

    pub fn log_tool_result(&self, ctx: &LogContext, name: &str, output: &str, is_error: bool) {
        let title = if is_error {
            format!("Tool error: `{name}`")
        } else {
            format!("Tool result: `{name}`")
        };
        self.entry(
            ctx,
            &title,
            &format::code_block("", &format::truncate(output, format::MAX_TOOL_OUTPUT)),
        );
    }

    pub fn log_thinking(&self, ctx: &LogContext, text: &str) {
        let quoted = text
            .lines()
            .map(|l| format!("> {l}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.entry(ctx, "Thinking", &quoted);
    }

    pub fn log_text_response(&self, ctx: &LogContext, text: &str) {
        self.entry(ctx, "Response", &format::code_block("markdown", text));
    }

    pub fn log_status_transition(&self, ctx: &LogContext, from: &str, to: &str) {
        self.entry(ctx, "Status", &format!("`{from}` → `{to}`"));
    }

    pub fn log_github_action(&self, ctx: &LogContext, action: &str, detail: &str) {
        self.entry(ctx, &format!("GitHub: {action}"), detail);
    }

    pub fn log_error(&self, ctx: &LogContext, error: &str, fatal: bool) {
        let title = if fatal { "Fatal error" } else { "Error" };
        self.entry(ctx, title, &format::code_block("", error));
    }

    pub fn log_token_usage(&self, ctx: &LogContext, usage: &Usage) {
        self.entry(ctx, "Token usage", &format::usage_line(usage));
    }

    /// Records a side effect a dry run skipped.
    pub fn log_dry_run(&self, ctx: &LogContext, action: &str) {
        self.entry(ctx, "Dry run", &format!("Would {action}"));
    }

    /// Logs one normalized agent event. Text is left to `log_text_response`
    /// so the final answer is written once.
    pub fn log_event(&self, ctx: &LogContext, event: &AgentEvent) {
        match event {
            AgentEvent::ToolCall { name, input } => self.log_tool_call(ctx, name, input),
            AgentEvent::ToolResult { name, output, is_error } => {
                self.log_tool_result(ctx, name, output, *is_error)
            }
            AgentEvent::Thinking(text) => self.log_thinking(ctx, text),
            AgentEvent::Text(_) | AgentEvent::Usage(_) => {}
        }
    }

    /// Callback for `RunOptions::on_event` that logs every event and echoes
    /// text to stdout when `stream` is set.
    pub fn event_callback(self: &Arc<Self>, ctx: &LogContext, stream: bool) -> EventCallback {
        let logger = Arc::clone(self);
        let ctx = ctx.clone();
        Arc::new(move |event: &AgentEvent| {
            logger.log_event(&ctx, event);
            if stream {
                if let AgentEvent::Text(text) = event {
                    println!("{text}");
                }
            }
        })
    }

    /// Closes the run's section and updates the issue's cost record in the
    /// background.
    pub fn log_execution_end(&self, ctx: &LogContext, summary: &ExecutionSummary) {
        let finished = Utc::now();
        self.append(ctx, &format::result_block(ctx, summary, finished));

        let entry = CostEntry {
            workflow: ctx.workflow.clone(),
            phase: ctx.phase.clone(),
            success: summary.success,
            input_tokens: summary.usage.input_tokens,
            output_tokens: summary.usage.output_tokens,
            cost_usd: summary.usage.cost_usd,
            duration_secs: (finished - ctx.start_time).num_milliseconds().max(0) as f64 / 1000.0,
            finished_at: finished,
        };
        let store = Arc::clone(&self.store);
        let issue = ctx.issue_number;
        let Ok(mut tasks) = self.tasks.lock() else {
            tracing::warn!(issue, "Execution logger task set poisoned, skipping cost record");
            return;
        };
        tasks.spawn(async move {
            if let Err(e) = update_cost_record(store.as_ref(), issue, entry).await {
                tracing::warn!(issue, error = %e, "Failed to update cost record");
            }
        });
    }

    pub fn log_exists(&self, issue_number: u64) -> bool {
        self.store.exists(&log_key(issue_number))
    }

    pub async fn read_log(&self, issue_number: u64) -> Result<Option<String>> {
        self.store.read(&log_key(issue_number)).await
    }

    /// Wait, at most `timeout`, for cost-record updates and queued remote
    /// writes.
    pub async fn flush(&self, timeout: Duration) {
        let mut tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => JoinSet::new(),
        };
        let drained = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(pending = tasks.len(), "Timed out waiting for cost record updates");
        }
        self.store.flush(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::types::{ItemContent, ReviewStatus, Status};

    fn item() -> WorkflowItem {
        WorkflowItem {
            id: "PVTI_9".to_string(),
            content: ItemContent {
                number: 9,
                title: "Export CSV".to_string(),
                body: String::new(),
                labels: vec![],
                item_type: ItemType::Feature,
                url: String::new(),
            },
            status: Status::Implementation,
            review_status: ReviewStatus::Empty,
            implementation_phase: String::new(),
        }
    }

    fn logger(dir: &std::path::Path) -> ExecutionLogger {
        ExecutionLogger::new(Arc::new(LocalLogStore::new(dir)))
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path());
        let ctx = LogContext::new(&item(), "implement", "Implementation");

        logger.log_execution_start(&ctx);
        logger.log_execution_start(&ctx.clone().with_mode("feedback"));

        let log = logger.read_log(9).await.unwrap().unwrap();
        assert_eq!(log.matches("# Issue #9: Export CSV").count(), 1);
        assert_eq!(log.matches("## Implementation").count(), 2);
        assert!(log.contains("**Mode:** feedback"));
    }

    #[tokio::test]
    async fn test_prompt_fences_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path());
        let ctx = LogContext::new(&item(), "implement", "Implementation");

        logger.log_prompt(&ctx, "Use this:\n```rust\nfn a() {}\n```");

        let log = logger.read_log(9).await.unwrap().unwrap();
        assert!(log.contains("````rust"));
        assert!(log.contains("### Prompt"));
    }

    #[tokio::test]
    async fn test_execution_end_updates_cost_record() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path());
        let ctx = LogContext::new(&item(), "implement", "Implementation");
        let summary = ExecutionSummary {
            success: true,
            tool_calls: 4,
            usage: Usage {
                input_tokens: 1_500,
                output_tokens: 200,
                cost_usd: Some(0.12),
            },
            error: None,
        };

        logger.log_execution_end(&ctx, &summary);
        logger.flush(Duration::from_secs(5)).await;

        let log = logger.read_log(9).await.unwrap().unwrap();
        assert!(log.contains("### Result: success"));
        assert!(log.contains("| Tool calls | 4 |"));
        assert!(log.contains("1,500 in / 200 out"));

        let raw = std::fs::read_to_string(dir.path().join("issue-9.costs.json")).unwrap();
        let record: cost::CostSummary = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.total_input_tokens, 1_500);
    }

    #[tokio::test]
    async fn test_event_callback_logs_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(logger(dir.path()));
        let ctx = LogContext::new(&item(), "implement", "Implementation");
        let callback = logger.event_callback(&ctx, false);

        callback(&AgentEvent::ToolCall {
            name: "Read".to_string(),
            input: serde_json::json!({"file_path": "src/lib.rs"}),
        });
        callback(&AgentEvent::Text("ignored".to_string()));

        let log = logger.read_log(9).await.unwrap().unwrap();
        assert!(log.contains("Tool call: `Read`"));
        assert!(log.contains("src/lib.rs"));
        assert!(!log.contains("ignored"));
    }
}
