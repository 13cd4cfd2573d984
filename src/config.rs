use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub github: GitHubConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub project_number: u64,
    #[serde(default = "default_true")]
    pub owner_is_org: bool,
    #[serde(default = "default_status_field")]
    pub status_field: String,
    #[serde(default = "default_review_status_field")]
    pub review_status_field: String,
    #[serde(default = "default_phase_field")]
    pub phase_field: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            owner: String::new(),
            repo: String::new(),
            project_number: 0,
            owner_is_org: true,
            status_field: default_status_field(),
            review_status_field: default_review_status_field(),
            phase_field: default_phase_field(),
        }
    }
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"[REDACTED]")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("project_number", &self.project_number)
            .field("owner_is_org", &self.owner_is_org)
            .field("status_field", &self.status_field)
            .field("review_status_field", &self.review_status_field)
            .field("phase_field", &self.phase_field)
            .finish()
    }
}

impl GitHubConfig {
    pub fn repo_full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentsConfig {
    /// Library used by every workflow without an explicit override.
    pub default_library: Option<String>,
    /// Per-workflow library override, keyed by workflow name.
    #[serde(default)]
    pub workflows: HashMap<String, String>,
    /// Per-workflow timeout in seconds, keyed by workflow name.
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_claude")]
    pub claude: LibraryConfig,
    #[serde(default = "default_cursor")]
    pub cursor: LibraryConfig,
    #[serde(default = "default_codex")]
    pub codex: LibraryConfig,
    #[serde(default = "default_gemini")]
    pub gemini: LibraryConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_library: None,
            workflows: HashMap::new(),
            timeouts: HashMap::new(),
            default_timeout_secs: default_timeout_secs(),
            claude: default_claude(),
            cursor: default_cursor(),
            codex: default_codex(),
            gemini: default_gemini(),
        }
    }
}

impl AgentsConfig {
    pub fn timeout_for(&self, workflow: &str) -> std::time::Duration {
        let secs = self
            .timeouts
            .get(workflow)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        std::time::Duration::from_secs(secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub executable: String,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub remote: RemoteLogConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            format: default_log_format(),
            remote: RemoteLogConfig::default(),
        }
    }
}

#[derive(Deserialize, Clone, Default)]
pub struct RemoteLogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_remote_prefix")]
    pub prefix: String,
}

impl std::fmt::Debug for RemoteLogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLogConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub admin_chat_id: String,
    pub info_chat_id: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            admin_chat_id: String::new(),
            info_chat_id: None,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

// Manual Debug impl to avoid leaking the bot token
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("enabled", &self.enabled)
            .field("bot_token", &"[REDACTED]")
            .field("admin_chat_id", &self.admin_chat_id)
            .field("info_chat_id", &self.info_chat_id)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    #[serde(default = "default_lock_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: default_lock_dir(),
            ttl_secs: default_lock_ttl(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_design_docs_dir")]
    pub design_docs_dir: PathBuf,
    pub test_command: Option<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            default_branch: default_branch(),
            design_docs_dir: default_design_docs_dir(),
            test_command: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_status_field() -> String {
    "Status".to_string()
}

fn default_review_status_field() -> String {
    "Review Status".to_string()
}

fn default_phase_field() -> String {
    "Implementation Phase".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn library(executable: &str) -> LibraryConfig {
    LibraryConfig {
        executable: executable.to_string(),
        model: None,
    }
}

fn default_claude() -> LibraryConfig {
    library("claude")
}

fn default_cursor() -> LibraryConfig {
    library("cursor-agent")
}

fn default_codex() -> LibraryConfig {
    library("codex")
}

fn default_gemini() -> LibraryConfig {
    library("gemini")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("agent-logs")
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_remote_prefix() -> String {
    "agent-logs".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from(".agent-workflow/locks")
}

fn default_lock_ttl() -> u64 {
    2 * 60 * 60 // 2 hours
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".agent-workflow/workflow-items.json")
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_design_docs_dir() -> PathBuf {
    PathBuf::from("design-docs")
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Credentials may live in .env / .env.local; real env vars still win.
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("agent-workflow").required(false));
        }

        // Environment variable overrides with AGENT_WORKFLOW_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("AGENT_WORKFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.github.token.trim().is_empty() {
            return Err(AppError::Config("github.token is empty".to_string()));
        }
        if self.telegram.enabled
            && (self.telegram.bot_token.is_empty() || self.telegram.admin_chat_id.is_empty())
        {
            return Err(AppError::Config(
                "telegram is enabled but bot_token or admin_chat_id is missing".to_string(),
            ));
        }
        if self.logging.remote.enabled && self.logging.remote.base_url.is_empty() {
            return Err(AppError::Config(
                "remote logging is enabled but logging.remote.base_url is empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_override() {
        let mut agents = AgentsConfig::default();
        agents.timeouts.insert("implement".to_string(), 1800);

        assert_eq!(agents.timeout_for("implement").as_secs(), 1800);
        assert_eq!(agents.timeout_for("tech-design").as_secs(), 600);
    }

    #[test]
    fn test_debug_redacts_token() {
        let github = GitHubConfig {
            token: "ghp_secret".to_string(),
            owner: "acme".to_string(),
            repo: "app".to_string(),
            project_number: 3,
            owner_is_org: true,
            status_field: default_status_field(),
            review_status_field: default_review_status_field(),
            phase_field: default_phase_field(),
        };

        let rendered = format!("{github:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("REDACTED"));
        assert_eq!(github.repo_full_name(), "acme/app");
    }
}
