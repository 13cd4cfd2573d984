use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::agent::process::{run_streaming, ProcessSpec};
use crate::agent::{AgentEvent, AgentLibrary, AgentRunResult, Capabilities, EventCollector, RunOptions, Usage};
use crate::config::LibraryConfig;
use crate::error::{AppError, Result};
use crate::parse::extract::extract_json;

const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "LS", "WebFetch", "WebSearch"];
const WRITE_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Claude Code driven through `claude --print --output-format stream-json`.
pub struct ClaudeCode {
    executable: String,
    model: Option<String>,
}

impl ClaudeCode {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            model: config.model.clone(),
        }
    }

    fn build_spec(&self, options: &RunOptions) -> Result<ProcessSpec> {
        let mut spec = ProcessSpec::new(&self.executable, &options.cwd)
            .args(["--print", "--output-format", "stream-json", "--verbose"])
            .stdin(options.prompt.clone());
        // Allow running from inside another Claude Code session.
        spec.env_remove.push("CLAUDECODE".to_string());

        if let Some(model) = options.model.as_ref().or(self.model.as_ref()) {
            spec = spec.arg("--model").arg(model);
        }
        if let Some(system) = &options.system_prompt {
            spec = spec.arg("--append-system-prompt").arg(system);
        }
        if let Some(schema) = &options.output_schema {
            spec = spec.arg("--json-schema").arg(serde_json::to_string(schema)?);
        }

        if options.allow_write {
            spec = spec.args(["--permission-mode", "bypassPermissions"]);
            if !options.allowed_tools.is_empty() {
                spec = spec.arg("--allowedTools").arg(options.allowed_tools.join(","));
            }
        } else {
            let tools = if options.allowed_tools.is_empty() {
                READ_ONLY_TOOLS.iter().map(|t| t.to_string()).collect::<Vec<_>>()
            } else {
                options.allowed_tools.clone()
            };
            spec = spec
                .arg("--allowedTools")
                .arg(tools.join(","))
                .arg("--disallowedTools")
                .arg(WRITE_TOOLS.join(","));
        }

        Ok(spec)
    }
}

// ─── stream-json wire types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    Assistant { message: MessageBody },
    User { message: MessageBody },
    Result(ResultMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: ContentField,
}

/// User messages sometimes carry plain string content.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentField {
    Blocks(Vec<ContentBlock>),
    Text(String),
}

impl Default for ContentField {
    fn default() -> Self {
        ContentField::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultMessage {
    subtype: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    usage: Option<ResultUsage>,
    #[serde(default)]
    structured_output: Option<Value>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResultUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

/// Folds stream-json lines into normalized events.
#[derive(Default)]
struct StreamState {
    tool_names: HashMap<String, String>,
    result: Option<ResultMessage>,
    malformed_lines: u32,
}

impl StreamState {
    fn feed(&mut self, line: &str, collector: &mut EventCollector) {
        let message = match serde_json::from_str::<StreamMessage>(line) {
            Ok(m) => m,
            Err(e) => {
                self.malformed_lines += 1;
                tracing::debug!(error = %e, "Skipping unparsable stream-json line");
                return;
            }
        };

        match message {
            StreamMessage::Assistant { message } | StreamMessage::User { message } => {
                let ContentField::Blocks(blocks) = message.content else {
                    return;
                };
                for block in blocks {
                    self.block(block, collector);
                }
            }
            StreamMessage::Result(result) => {
                if let Some(u) = &result.usage {
                    collector.emit(AgentEvent::Usage(Usage {
                        input_tokens: u.input_tokens
                            + u.cache_creation_input_tokens.unwrap_or(0)
                            + u.cache_read_input_tokens.unwrap_or(0),
                        output_tokens: u.output_tokens,
                        cost_usd: result.total_cost_usd,
                    }));
                }
                self.result = Some(result);
            }
            StreamMessage::Unknown => {}
        }
    }

    fn block(&mut self, block: ContentBlock, collector: &mut EventCollector) {
        match block {
            ContentBlock::Text { text } => collector.emit(AgentEvent::Text(text)),
            ContentBlock::Thinking { thinking } => collector.emit(AgentEvent::Thinking(thinking)),
            ContentBlock::ToolUse { id, name, input } => {
                self.tool_names.insert(id, name.clone());
                collector.emit(AgentEvent::ToolCall { name, input });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let name = self
                    .tool_names
                    .get(&tool_use_id)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                collector.emit(AgentEvent::ToolResult {
                    name,
                    output: tool_result_text(&content),
                    is_error: is_error.unwrap_or(false),
                });
            }
            ContentBlock::Other => {}
        }
    }
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl AgentLibrary for ClaudeCode {
    fn name(&self) -> &'static str {
        "claude-code-sdk"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            structured_output: true,
            tool_use: true,
            write_mode: true,
        }
    }

    async fn init(&self) -> Result<()> {
        which::which(&self.executable)
            .map(|_| ())
            .map_err(|e| AppError::Agent(format!("Claude Code executable '{}' not found: {e}", self.executable)))
    }

    async fn run(&self, options: RunOptions) -> AgentRunResult {
        let spec = match self.build_spec(&options) {
            Ok(spec) => spec,
            Err(e) => return AgentRunResult::failure(e.to_string()),
        };

        let mut collector = EventCollector::new(options.on_event.clone());
        let mut state = StreamState::default();

        let outcome = match run_streaming(&spec, options.timeout, |line| state.feed(line, &mut collector)).await {
            Ok(outcome) => outcome,
            Err(e) => return AgentRunResult::failure(e.to_string()),
        };

        let mut result = AgentRunResult {
            success: false,
            content: collector.text(),
            structured_output: None,
            usage: collector.usage,
            tool_calls: collector.tool_calls,
            error: None,
        };

        if outcome.timed_out {
            result.error = Some("timeout".to_string());
            return result;
        }

        match state.result {
            Some(r) if r.subtype == "success" && !r.is_error => {
                if let Some(text) = r.result.filter(|t| !t.trim().is_empty()) {
                    result.content = Some(text);
                }
                result.structured_output = r.structured_output.or_else(|| {
                    options
                        .output_schema
                        .as_ref()
                        .and(result.content.as_deref())
                        .and_then(extract_json)
                });
                result.success = true;
            }
            Some(r) => {
                let detail = if r.errors.is_empty() {
                    r.result.unwrap_or_default()
                } else {
                    r.errors.join("; ")
                };
                result.error = Some(format!("Claude Code run failed ({}): {detail}", r.subtype));
            }
            None if !outcome.success() => {
                result.error = Some(outcome.failure_message(&self.executable));
            }
            None => {
                result.error = Some(format!(
                    "Claude Code exited without a result message ({} unparsable lines)",
                    state.malformed_lines
                ));
            }
        }

        result
    }
}
