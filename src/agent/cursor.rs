use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::agent::process::{run_streaming, ProcessSpec};
use crate::agent::{AgentEvent, AgentLibrary, AgentRunResult, Capabilities, EventCollector, RunOptions};
use crate::config::LibraryConfig;
use crate::error::{AppError, Result};
use crate::parse::extract::extract_json;

/// Cursor's headless agent, `cursor-agent -p --output-format stream-json`.
///
/// The CLI has no schema flag, so structured output is recovered from the
/// final text with `extract_json`. It reports no token usage.
pub struct CursorAgent {
    executable: String,
    model: Option<String>,
}

impl CursorAgent {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            model: config.model.clone(),
        }
    }

    fn build_spec(&self, options: &RunOptions) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.executable, &options.cwd)
            .args(["-p", "--output-format", "stream-json"]);

        if let Some(model) = options.model.as_ref().or(self.model.as_ref()) {
            spec = spec.arg("--model").arg(model);
        }
        if options.allow_write {
            spec = spec.arg("--force");
        }

        let prompt = match &options.system_prompt {
            Some(system) => format!("{system}\n\n{}", options.prompt),
            None => options.prompt.clone(),
        };
        let prompt = if options.allow_write {
            prompt
        } else {
            format!("{prompt}\n\nDo not modify any files. This is a read-only task.")
        };
        spec.arg(prompt)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CursorEvent {
    Assistant {
        message: CursorMessage,
    },
    ToolCall {
        subtype: String,
        #[serde(default)]
        tool_call: Value,
    },
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct CursorMessage {
    #[serde(default)]
    content: Vec<CursorContent>,
}

#[derive(Debug, Deserialize)]
struct CursorContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Default)]
struct CursorState {
    result: Option<(bool, Option<String>)>,
}

impl CursorState {
    fn feed(&mut self, line: &str, collector: &mut EventCollector) {
        let Ok(event) = serde_json::from_str::<CursorEvent>(line) else {
            tracing::debug!("Skipping unparsable cursor-agent line");
            return;
        };

        match event {
            CursorEvent::Assistant { message } => {
                for text in message.content.into_iter().filter_map(|c| c.text) {
                    collector.emit(AgentEvent::Text(text));
                }
            }
            CursorEvent::ToolCall { subtype, tool_call } => {
                // `tool_call` is `{"<name>ToolCall": {"args": ..., "result": ...}}`.
                let Some((key, body)) = tool_call.as_object().and_then(|o| o.iter().next()) else {
                    return;
                };
                let name = key.trim_end_matches("ToolCall").to_string();
                match subtype.as_str() {
                    "started" => collector.emit(AgentEvent::ToolCall {
                        name,
                        input: body["args"].clone(),
                    }),
                    "completed" => {
                        let is_error = body["result"].get("error").is_some();
                        collector.emit(AgentEvent::ToolResult {
                            name,
                            output: body["result"].to_string(),
                            is_error,
                        });
                    }
                    _ => {}
                }
            }
            CursorEvent::Result {
                subtype,
                is_error,
                result,
            } => {
                self.result = Some((subtype == "success" && !is_error, result));
            }
            CursorEvent::Unknown => {}
        }
    }
}

#[async_trait]
impl AgentLibrary for CursorAgent {
    fn name(&self) -> &'static str {
        "cursor"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            structured_output: false,
            tool_use: true,
            write_mode: true,
        }
    }

    async fn init(&self) -> Result<()> {
        which::which(&self.executable)
            .map(|_| ())
            .map_err(|e| AppError::Agent(format!("Cursor executable '{}' not found: {e}", self.executable)))
    }

    async fn run(&self, options: RunOptions) -> AgentRunResult {
        let spec = self.build_spec(&options);
        let mut collector = EventCollector::new(options.on_event.clone());
        let mut state = CursorState::default();

        let outcome = match run_streaming(&spec, options.timeout, |line| state.feed(line, &mut collector)).await {
            Ok(outcome) => outcome,
            Err(e) => return AgentRunResult::failure(e.to_string()),
        };

        let mut result = AgentRunResult {
            content: collector.text(),
            usage: collector.usage,
            tool_calls: collector.tool_calls,
            ..Default::default()
        };

        if outcome.timed_out {
            result.error = Some("timeout".to_string());
            return result;
        }

        match state.result {
            Some((true, text)) => {
                if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                    result.content = Some(text);
                }
                if options.output_schema.is_some() {
                    result.structured_output = result.content.as_deref().and_then(extract_json);
                }
                result.success = true;
            }
            Some((false, text)) => {
                result.error = Some(format!(
                    "cursor-agent reported an error: {}",
                    text.unwrap_or_default()
                ));
            }
            None => result.error = Some(outcome.failure_message(&self.executable)),
        }

        result
    }
}
