use std::io::Write;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::agent::process::{run_streaming, ProcessSpec};
use crate::agent::{AgentEvent, AgentLibrary, AgentRunResult, Capabilities, EventCollector, RunOptions, Usage};
use crate::config::LibraryConfig;
use crate::error::{AppError, Result};
use crate::parse::extract::extract_json;

/// OpenAI Codex via `codex exec --json`, prompt on stdin.
pub struct Codex {
    executable: String,
    model: Option<String>,
}

impl Codex {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            model: config.model.clone(),
        }
    }

    /// The schema file must outlive the process, so it is returned alongside.
    fn build_spec(&self, options: &RunOptions) -> Result<(ProcessSpec, Option<tempfile::NamedTempFile>)> {
        let mut spec = ProcessSpec::new(&self.executable, &options.cwd)
            .args(["exec", "--json", "--skip-git-repo-check"]);

        if let Some(model) = options.model.as_ref().or(self.model.as_ref()) {
            spec = spec.arg("--model").arg(model);
        }
        spec = if options.allow_write {
            spec.arg("--full-auto")
        } else {
            spec.args(["--sandbox", "read-only"])
        };

        let schema_file = match &options.output_schema {
            Some(schema) => {
                let mut file = tempfile::Builder::new()
                    .prefix("agent-schema-")
                    .suffix(".json")
                    .tempfile()?;
                file.write_all(serde_json::to_string(schema)?.as_bytes())?;
                file.flush()?;
                spec = spec
                    .arg("--output-schema")
                    .arg(file.path().display().to_string());
                Some(file)
            }
            None => None,
        };

        let prompt = match &options.system_prompt {
            Some(system) => format!("{system}\n\n{}", options.prompt),
            None => options.prompt.clone(),
        };
        // `-` reads the prompt from stdin.
        Ok((spec.arg("-").stdin(prompt), schema_file))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CodexEvent {
    #[serde(rename = "item.started")]
    ItemStarted { item: CodexItem },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: CodexUsage,
    },
    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Value,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct CodexItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    aggregated_output: Option<String>,
    #[serde(default)]
    exit_code: Option<i64>,
    #[serde(default)]
    changes: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct CodexUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cached_input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Default)]
struct CodexState {
    last_message: Option<String>,
    turn_completed: bool,
    failure: Option<String>,
}

impl CodexState {
    fn feed(&mut self, line: &str, collector: &mut EventCollector) {
        let Ok(event) = serde_json::from_str::<CodexEvent>(line) else {
            tracing::debug!("Skipping unparsable codex line");
            return;
        };

        match event {
            CodexEvent::ItemStarted { item } if item.kind == "command_execution" => {
                collector.emit(AgentEvent::ToolCall {
                    name: "shell".to_string(),
                    input: serde_json::json!({ "command": item.command }),
                });
            }
            CodexEvent::ItemStarted { .. } => {}
            CodexEvent::ItemCompleted { item } => match item.kind.as_str() {
                "agent_message" => {
                    if let Some(text) = item.text {
                        self.last_message = Some(text.clone());
                        collector.emit(AgentEvent::Text(text));
                    }
                }
                "reasoning" => {
                    if let Some(text) = item.text {
                        collector.emit(AgentEvent::Thinking(text));
                    }
                }
                "command_execution" => collector.emit(AgentEvent::ToolResult {
                    name: "shell".to_string(),
                    output: item.aggregated_output.unwrap_or_default(),
                    is_error: item.exit_code.is_some_and(|c| c != 0),
                }),
                "file_change" => {
                    let input = item.changes.unwrap_or(Value::Null);
                    collector.emit(AgentEvent::ToolCall {
                        name: "apply_patch".to_string(),
                        input,
                    });
                }
                _ => {}
            },
            CodexEvent::TurnCompleted { usage } => {
                self.turn_completed = true;
                collector.emit(AgentEvent::Usage(Usage {
                    input_tokens: usage.input_tokens + usage.cached_input_tokens,
                    output_tokens: usage.output_tokens,
                    cost_usd: None,
                }));
            }
            CodexEvent::TurnFailed { error } => {
                self.failure = Some(
                    error["message"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                );
            }
            CodexEvent::Error { message } => self.failure = Some(message),
            CodexEvent::Unknown => {}
        }
    }
}

#[async_trait]
impl AgentLibrary for Codex {
    fn name(&self) -> &'static str {
        "openai-codex"
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
            .map_err(|e| AppError::Agent(format!("Codex executable '{}' not found: {e}", self.executable)))
    }

    async fn run(&self, options: RunOptions) -> AgentRunResult {
        let (spec, _schema_file) = match self.build_spec(&options) {
            Ok(built) => built,
            Err(e) => return AgentRunResult::failure(e.to_string()),
        };
        let mut collector = EventCollector::new(options.on_event.clone());
        let mut state = CodexState::default();

        let outcome = match run_streaming(&spec, options.timeout, |line| state.feed(line, &mut collector)).await {
            Ok(outcome) => outcome,
            Err(e) => return AgentRunResult::failure(e.to_string()),
        };

        let mut result = AgentRunResult {
            content: state.last_message.clone().or_else(|| collector.text()),
            usage: collector.usage,
            tool_calls: collector.tool_calls,
            ..Default::default()
        };

        if outcome.timed_out {
            result.error = Some("timeout".to_string());
        } else if let Some(failure) = state.failure {
            result.error = Some(format!("Codex turn failed: {failure}"));
        } else if !state.turn_completed || !outcome.success() {
            result.error = Some(outcome.failure_message(&self.executable));
        } else {
            if options.output_schema.is_some() {
                result.structured_output = result.content.as_deref().and_then(extract_json);
            }
            result.success = true;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_normalized() {
        let mut state = CodexState::default();
        let mut collector = EventCollector::new(None);
        for line in [
            r#"{"type":"thread.started","thread_id":"t"}"#,
            r#"{"type":"item.started","item":{"id":"i0","type":"command_execution","command":"ls","status":"in_progress"}}"#,
            r#"{"type":"item.completed","item":{"id":"i0","type":"command_execution","command":"ls","aggregated_output":"src\n","exit_code":0,"status":"completed"}}"#,
            r#"{"type":"item.completed","item":{"id":"i1","type":"agent_message","text":"{\"summary\":\"ok\"}"}}"#,
            r#"{"type":"turn.completed","usage":{"input_tokens":10,"cached_input_tokens":5,"output_tokens":3}}"#,
        ] {
            state.feed(line, &mut collector);
        }

        assert!(state.turn_completed);
        assert!(state.failure.is_none());
        assert_eq!(collector.tool_calls, 1);
        assert_eq!(collector.usage.input_tokens, 15);
        assert_eq!(state.last_message.as_deref(), Some(r#"{"summary":"ok"}"#));
    }

    #[test]
    fn test_turn_failure_is_captured() {
        let mut state = CodexState::default();
        let mut collector = EventCollector::new(None);
        state.feed(r#"{"type":"turn.failed","error":{"message":"quota"}}"#, &mut collector);
        assert_eq!(state.failure.as_deref(), Some("quota"));
    }

    #[test]
    fn test_schema_file_and_sandbox() {
        let codex = Codex::new(&LibraryConfig {
            executable: "codex".to_string(),
            model: None,
        });
        let mut options = RunOptions::new("do it", "/tmp");
        options.output_schema = Some(serde_json::json!({"type": "object"}));

        let (spec, file) = codex.build_spec(&options).unwrap();
        let file = file.unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), r#"{"type":"object"}"#);
        assert!(spec.args.join(" ").contains("--sandbox read-only"));
        assert_eq!(spec.args.last().unwrap(), "-");
        assert_eq!(spec.stdin.as_deref(), Some("do it"));
    }
}
