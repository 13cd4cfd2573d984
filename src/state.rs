use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentLibraries;
use crate::artifact::phases::default_sources;
use crate::artifact::{DesignDocStore, PhaseSource};
use crate::config::AppConfig;
use crate::error::Result;
use crate::lock::LockManager;
use crate::logging::ExecutionLogger;
use crate::notify::NotificationService;
use crate::platform::github::GitHubProject;
use crate::platform::ProjectManager;
use crate::store::{FileStore, WorkflowStore};
use crate::workspace::Workspace;

/// Everything one CLI run works with.
pub struct AppState {
    pub config: AppConfig,
    pub project: Arc<dyn ProjectManager>,
    pub store: Arc<dyn WorkflowStore>,
    pub libraries: AgentLibraries,
    pub logger: Arc<ExecutionLogger>,
    pub notifier: NotificationService,
    pub locks: LockManager,
    pub workspace: Workspace,
    pub designs: Arc<DesignDocStore>,
    pub phase_sources: Vec<Arc<dyn PhaseSource>>,
}

impl AppState {
    /// Production wiring: GitHub Projects, the JSON-file store, configured
    /// log store and Telegram. Initialises the project adapter.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let project: Arc<dyn ProjectManager> = Arc::new(GitHubProject::new(&config.github)?);
        project.init().await?;

        let store: Arc<dyn WorkflowStore> = Arc::new(FileStore::new(&config.store.path));
        let logger = Arc::new(ExecutionLogger::from_config(&config.logging)?);
        let notifier = NotificationService::from_config(&config.telegram)?;

        Ok(Self::from_parts(config, project, store, logger, notifier))
    }

    /// Wire the remaining collaborators around the given ones.
    pub fn from_parts(
        config: AppConfig,
        project: Arc<dyn ProjectManager>,
        store: Arc<dyn WorkflowStore>,
        logger: Arc<ExecutionLogger>,
        notifier: NotificationService,
    ) -> Self {
        let designs = Arc::new(DesignDocStore::new(&config.workspace));
        let phase_sources = default_sources(Arc::clone(&store), Arc::clone(&project), Arc::clone(&designs));
        let token = Some(config.github.token.clone());

        Self {
            libraries: AgentLibraries::new(config.agents.clone()),
            locks: LockManager::new(&config.lock),
            workspace: Workspace::new(&config.workspace, token),
            project,
            store,
            logger,
            notifier,
            designs,
            phase_sources,
            config,
        }
    }

    pub fn repo_full_name(&self) -> String {
        self.config.github.repo_full_name()
    }

    /// Wait, at most `timeout` each, for detached notification and log
    /// tasks.
    pub async fn flush(&self, timeout: Duration) {
        self.notifier.flush(timeout).await;
        self.logger.flush(timeout).await;
    }
}
