use async_trait::async_trait;

use crate::agent::{AgentLibrary, AgentRunResult, Capabilities, RunOptions};
use crate::error::Result;

/// Placeholder for Gemini. Selectable through configuration like any other
/// backend, but every run fails with `not implemented`.
pub struct Gemini;

#[async_trait]
impl AgentLibrary for Gemini {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            structured_output: false,
            tool_use: false,
            write_mode: false,
        }
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, _options: RunOptions) -> AgentRunResult {
        AgentRunResult::failure("not implemented")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_is_not_implemented() {
        let gemini = Gemini;
        gemini.init().await.unwrap();
        let result = gemini.run(RunOptions::new("hi", ".")).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("not implemented"));
    }
}
