pub mod claude;
pub mod codex;
pub mod cursor;
pub mod factory;
pub mod gemini;
pub mod process;
pub mod prompt;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use factory::{AgentLibraries, LibraryId};

/// Token counts and estimated cost of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Option<f64>,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd = match (self.cost_usd, other.cost_usd) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
    }
}

/// What a backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub streaming: bool,
    pub structured_output: bool,
    pub tool_use: bool,
    /// Whether the backend can be allowed to edit the working tree.
    pub write_mode: bool,
}

/// Normalized stream event, whatever the backend's wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Text(String),
    Thinking(String),
    ToolCall { name: String, input: Value },
    ToolResult { name: String, output: String, is_error: bool },
    Usage(Usage),
}

pub type EventCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Clone)]
pub struct RunOptions {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Tools the agent may use. Empty leaves the backend's defaults.
    pub allowed_tools: Vec<String>,
    pub model: Option<String>,
    pub timeout: Duration,
    /// JSON schema the final answer must match.
    pub output_schema: Option<Value>,
    pub stream: bool,
    pub allow_write: bool,
    pub cwd: PathBuf,
    pub on_event: Option<EventCallback>,
}

impl RunOptions {
    pub fn new(prompt: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            allowed_tools: Vec::new(),
            model: None,
            timeout: Duration::from_secs(600),
            output_schema: None,
            stream: false,
            allow_write: false,
            cwd: cwd.into(),
            on_event: None,
        }
    }
}

// Manual Debug impl: the callback is not Debug
impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("prompt_len", &self.prompt.len())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("structured", &self.output_schema.is_some())
            .field("stream", &self.stream)
            .field("allow_write", &self.allow_write)
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// Normalized outcome of one adapter call.
#[derive(Debug, Clone, Default)]
pub struct AgentRunResult {
    pub success: bool,
    pub content: Option<String>,
    pub structured_output: Option<Value>,
    pub usage: Usage,
    pub tool_calls: u32,
    pub error: Option<String>,
}

impl AgentRunResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Structured output, only when the run succeeded.
    pub fn trusted_output(&self) -> Option<&Value> {
        if self.success {
            self.structured_output.as_ref()
        } else {
            None
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some("timeout")
    }
}

/// One AI coding-agent backend behind the uniform run contract.
///
/// `run` never returns an error: backend failures, timeouts and crashes are
/// reported through `AgentRunResult::success` and `error`.
#[async_trait]
pub trait AgentLibrary: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Check the backend is usable (executable present, credentials set).
    async fn init(&self) -> Result<()>;

    async fn run(&self, options: RunOptions) -> AgentRunResult;
}

/// Accumulates normalized events into a run result and forwards them to the
/// caller's callback.
pub struct EventCollector {
    callback: Option<EventCallback>,
    text: Vec<String>,
    pub tool_calls: u32,
    pub usage: Usage,
}

impl EventCollector {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self {
            callback,
            text: Vec::new(),
            tool_calls: 0,
            usage: Usage::default(),
        }
    }

    pub fn emit(&mut self, event: AgentEvent) {
        match &event {
            AgentEvent::Text(t) => self.text.push(t.clone()),
            AgentEvent::ToolCall { .. } => self.tool_calls += 1,
            AgentEvent::Usage(u) => self.usage.add(u),
            AgentEvent::Thinking(_) | AgentEvent::ToolResult { .. } => {}
        }
        if let Some(cb) = &self.callback {
            cb(&event);
        }
    }

    /// All text emitted so far, joined by blank lines.
    pub fn text(&self) -> Option<String> {
        let joined = self.text.join("\n\n");
        (!joined.trim().is_empty()).then_some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_usage_add_keeps_unknown_cost() {
        let mut total = Usage::default();
        total.add(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            cost_usd: None,
        });
        assert_eq!(total.cost_usd, None);
        total.add(&Usage {
            input_tokens: 1,
            output_tokens: 1,
            cost_usd: Some(0.25),
        });
        assert_eq!(total.total_tokens(), 17);
        assert_eq!(total.cost_usd, Some(0.25));
    }

    #[test]
    fn test_untrusted_output_on_failure() {
        let mut result = AgentRunResult::failure("boom");
        result.structured_output = Some(serde_json::json!({"ok": true}));
        assert!(result.trusted_output().is_none());
        assert!(!AgentRunResult::failure("boom").is_timeout());
        assert!(AgentRunResult::failure("timeout").is_timeout());
    }

    #[test]
    fn test_collector_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut collector = EventCollector::new(Some(Arc::new(move |e: &AgentEvent| {
            sink.lock().unwrap().push(e.clone());
        })));

        collector.emit(AgentEvent::Text("hello".into()));
        collector.emit(AgentEvent::ToolCall {
            name: "Read".into(),
            input: serde_json::json!({"path": "a"}),
        });
        collector.emit(AgentEvent::Text("world".into()));

        assert_eq!(collector.tool_calls, 1);
        assert_eq!(collector.text().as_deref(), Some("hello\n\nworld"));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
