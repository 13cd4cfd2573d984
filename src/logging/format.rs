//! Markdown rendering for execution log entries.

use chrono::{DateTime, Utc};

use crate::agent::Usage;
use crate::logging::{ExecutionSummary, LogContext};
use crate::platform::types::ItemType;

/// Longest tool output kept in the log.
pub const MAX_TOOL_OUTPUT: usize = 2_000;

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Embedded fences are widened to four backticks so they cannot close the
/// log's own code block.
pub fn escape_fences(text: &str) -> String {
    text.replace("```", "````")
}

pub fn code_block(lang: &str, text: &str) -> String {
    format!("```{lang}\n{}\n```", escape_fences(text.trim_end()))
}

/// Truncate at a UTF-8 boundary, marking the cut.
pub fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut pos = max_bytes;
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    format!("{}\n... ({} bytes truncated)", &text[..pos], text.len() - pos)
}

/// Token count with thousands separators.
pub fn format_tokens(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.chars().rev().collect()
}

pub fn format_cost(cost: Option<f64>) -> String {
    match cost {
        Some(c) => format!("${c:.4}"),
        None => "n/a".to_string(),
    }
}

/// One timestamped entry.
pub fn entry(title: &str, at: DateTime<Utc>, body: &str) -> String {
    if body.is_empty() {
        format!("### {title}\n_{}_\n\n", timestamp(at))
    } else {
        format!("### {title}\n_{}_\n\n{}\n\n", timestamp(at), body.trim_end())
    }
}

/// Top of a new issue log.
pub fn file_header(ctx: &LogContext) -> String {
    let kind = match ctx.issue_type {
        ItemType::Feature => "feature",
        ItemType::Bug => "bug",
    };
    format!(
        "# Issue #{}: {}\n\n- **Type:** {kind}\n- **Log started:** {}\n\n",
        ctx.issue_number,
        ctx.issue_title,
        timestamp(ctx.start_time),
    )
}

pub fn phase_header(ctx: &LogContext) -> String {
    let mode = ctx
        .mode
        .as_deref()
        .map(|m| format!("\n- **Mode:** {m}"))
        .unwrap_or_default();
    format!(
        "---\n\n## {}\n\n- **Workflow:** {}{mode}\n- **Started:** {}\n\n",
        ctx.phase,
        ctx.workflow,
        timestamp(ctx.start_time),
    )
}

pub fn usage_line(usage: &Usage) -> String {
    format!(
        "{} input / {} output tokens ({} total), cost {}",
        format_tokens(usage.input_tokens),
        format_tokens(usage.output_tokens),
        format_tokens(usage.total_tokens()),
        format_cost(usage.cost_usd),
    )
}

pub fn result_block(ctx: &LogContext, summary: &ExecutionSummary, finished: DateTime<Utc>) -> String {
    let duration = (finished - ctx.start_time).num_milliseconds().max(0) as f64 / 1000.0;
    let mut out = format!(
        "### Result: {}\n_{}_\n\n| | |\n|---|---|\n| Duration | {duration:.1}s |\n| Tool calls | {} |\n| Tokens | {} in / {} out |\n| Cost | {} |\n",
        if summary.success { "success" } else { "failed" },
        timestamp(finished),
        summary.tool_calls,
        format_tokens(summary.usage.input_tokens),
        format_tokens(summary.usage.output_tokens),
        format_cost(summary.usage.cost_usd),
    );
    if let Some(error) = &summary.error {
        out.push_str(&format!("\n**Error:** {}\n", error.trim()));
    }
    out.push('\n');
    out
}
