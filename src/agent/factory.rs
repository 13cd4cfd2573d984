use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agent::claude::ClaudeCode;
use crate::agent::codex::Codex;
use crate::agent::cursor::CursorAgent;
use crate::agent::gemini::Gemini;
use crate::agent::AgentLibrary;
use crate::config::AgentsConfig;
use crate::error::{AppError, Result};

/// The closed set of agent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LibraryId {
    ClaudeCodeSdk,
    Cursor,
    Gemini,
    OpenaiCodex,
}

impl LibraryId {
    /// Used when nothing is configured, and as the retry target when the
    /// configured backend cannot be initialised.
    pub const FALLBACK: LibraryId = LibraryId::ClaudeCodeSdk;

    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryId::ClaudeCodeSdk => "claude-code-sdk",
            LibraryId::Cursor => "cursor",
            LibraryId::Gemini => "gemini",
            LibraryId::OpenaiCodex => "openai-codex",
        }
    }
}

impl FromStr for LibraryId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude-code-sdk" | "claude-code" | "claude" => Ok(LibraryId::ClaudeCodeSdk),
            "cursor" | "cursor-agent" => Ok(LibraryId::Cursor),
            "gemini" => Ok(LibraryId::Gemini),
            "openai-codex" | "codex" => Ok(LibraryId::OpenaiCodex),
            other => Err(AppError::Config(format!("Unknown agent library: {other}"))),
        }
    }
}

impl std::fmt::Display for LibraryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the backend for a workflow: per-workflow override, then the
/// global default, then `claude-code-sdk`. Unknown names are skipped with a
/// warning.
pub fn library_for_workflow(config: &AgentsConfig, workflow: &str) -> LibraryId {
    let candidates = [
        config.workflows.get(workflow).map(String::as_str),
        config.default_library.as_deref(),
    ];
    for name in candidates.into_iter().flatten() {
        match name.parse() {
            Ok(id) => return id,
            Err(e) => tracing::warn!(workflow, error = %e, "Ignoring agent library setting"),
        }
    }
    LibraryId::FALLBACK
}

/// Lazily constructed, initialised and cached adapters, one per backend.
///
/// Adapters hold only their configuration, so a cached instance can serve
/// several workflows at once.
pub struct AgentLibraries {
    config: AgentsConfig,
    cache: Mutex<HashMap<LibraryId, Arc<dyn AgentLibrary>>>,
}

impl AgentLibraries {
    pub fn new(config: AgentsConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AgentsConfig {
        &self.config
    }

    /// Install an already initialised adapter for a backend.
    pub async fn register(&self, id: LibraryId, library: Arc<dyn AgentLibrary>) {
        self.cache.lock().await.insert(id, library);
    }

    pub fn library_for_workflow(&self, workflow: &str) -> LibraryId {
        library_for_workflow(&self.config, workflow)
    }

    pub fn timeout_for(&self, workflow: &str) -> Duration {
        self.config.timeout_for(workflow)
    }

    fn build(&self, id: LibraryId) -> Arc<dyn AgentLibrary> {
        match id {
            LibraryId::ClaudeCodeSdk => Arc::new(ClaudeCode::new(&self.config.claude)),
            LibraryId::Cursor => Arc::new(CursorAgent::new(&self.config.cursor)),
            LibraryId::Gemini => Arc::new(Gemini),
            LibraryId::OpenaiCodex => Arc::new(Codex::new(&self.config.codex)),
        }
    }

    async fn get_or_init(&self, id: LibraryId) -> Result<Arc<dyn AgentLibrary>> {
        let mut cache = self.cache.lock().await;
        if let Some(library) = cache.get(&id) {
            return Ok(Arc::clone(library));
        }
        let library = self.build(id);
        library.init().await?;
        cache.insert(id, Arc::clone(&library));
        Ok(library)
    }

    /// The adapter for a workflow. When the resolved backend fails to
    /// initialise, the fallback backend is tried once before giving up.
    pub async fn get(&self, workflow: &str) -> Result<Arc<dyn AgentLibrary>> {
        let id = self.library_for_workflow(workflow);
        match self.get_or_init(id).await {
            Ok(library) => Ok(library),
            Err(e) if id != LibraryId::FALLBACK => {
                tracing::warn!(
                    workflow,
                    library = %id,
                    fallback = %LibraryId::FALLBACK,
                    error = %e,
                    "Agent library failed to initialise, using fallback"
                );
                self.get_or_init(LibraryId::FALLBACK).await
            }
            Err(e) => Err(e),
        }
    }
}
