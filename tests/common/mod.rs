#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_workflow::agent::{AgentLibrary, AgentRunResult, Capabilities, LibraryId, RunOptions, Usage};
use agent_workflow::config::AppConfig;
use agent_workflow::error::Result;
use agent_workflow::logging::store::{LocalLogStore, LogStore};
use agent_workflow::logging::ExecutionLogger;
use agent_workflow::notify::{NotificationMessage, NotificationService, NotificationTransport, RetryConfig};
use agent_workflow::platform::memory::InMemoryProject;
use agent_workflow::platform::types::{ItemContent, ItemType, ReviewStatus, Status, WorkflowItem};
use agent_workflow::state::AppState;
use agent_workflow::store::FileStore;
use async_trait::async_trait;
use git2::{Repository, Signature};
use serde_json::Value;
use tempfile::TempDir;

/// Records every delivered message text, admin and info channel alike.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_to_admin(&self, message: &NotificationMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.text.clone());
        Ok(())
    }

    async fn send_to_info_channel(&self, message: &NotificationMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.text.clone());
        Ok(())
    }
}

/// Agent that answers every run with the same canned output. In write mode
/// it drops a new file into the working tree so there is something to
/// commit.
pub struct ScriptedAgent {
    structured: Option<Value>,
    content: Option<String>,
    calls: AtomicU32,
}

impl ScriptedAgent {
    pub fn new(structured: Option<Value>, content: Option<&str>) -> Self {
        Self {
            structured,
            content: content.map(str::to_string),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentLibrary for ScriptedAgent {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            structured_output: true,
            tool_use: true,
            write_mode: true,
        }
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, options: RunOptions) -> AgentRunResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if options.allow_write {
            fs::write(options.cwd.join(format!("change-{n}.txt")), format!("change {n}\n")).unwrap();
        }
        AgentRunResult {
            success: true,
            content: self.content.clone(),
            structured_output: self.structured.clone(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
                cost_usd: Some(0.01),
            },
            tool_calls: 1,
            error: None,
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub project: Arc<InMemoryProject>,
    pub store: Arc<FileStore>,
    pub transport: Arc<RecordingTransport>,
    pub agent: Arc<ScriptedAgent>,
    pub state: AppState,
}

impl Harness {
    pub async fn new(agent: ScriptedAgent) -> Self {
        Self::with_log_store(agent, |logs| Arc::new(LocalLogStore::new(logs)) as Arc<dyn LogStore>).await
    }

    /// Like `new`, with the execution logs kept in the store `make_store`
    /// builds over the harness's log directory.
    pub async fn with_log_store(agent: ScriptedAgent, make_store: impl FnOnce(PathBuf) -> Arc<dyn LogStore>) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        init_repo(&repo);

        let mut config = AppConfig::default();
        config.github.owner = "acme".to_string();
        config.github.repo = "widgets".to_string();
        config.workspace.repo_path = repo;
        config.lock.dir = dir.path().join("locks");
        config.store.path = dir.path().join("items.json");

        let project = Arc::new(InMemoryProject::new());
        let store = Arc::new(FileStore::new(&config.store.path));
        let logger = Arc::new(ExecutionLogger::new(make_store(dir.path().join("logs"))));
        let transport = Arc::new(RecordingTransport::default());
        let notifier = NotificationService::new(
            transport.clone(),
            RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        );

        let state = AppState::from_parts(config, project.clone(), store.clone(), logger, notifier);
        let agent = Arc::new(agent);
        state.libraries.register(LibraryId::ClaudeCodeSdk, agent.clone()).await;

        Self {
            dir,
            project,
            store,
            transport,
            agent,
            state,
        }
    }

    pub fn repo(&self) -> &Path {
        self.state.workspace.root()
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.dir.path().join("locks")
    }

    /// Create a local branch at the current HEAD of `main`.
    pub fn create_branch(&self, name: &str) {
        let repo = Repository::open(self.repo()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch(name, &head, false).unwrap();
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        let repo = Repository::open(self.repo()).unwrap();
        let found = repo.find_branch(name, git2::BranchType::Local).is_ok();
        found
    }

    pub async fn settle(&self) {
        self.state.flush(Duration::from_secs(5)).await;
    }
}

pub fn init_repo(path: &Path) {
    fs::create_dir_all(path).unwrap();
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(path, &opts).unwrap();
    fs::write(path.join("README.md"), "widgets\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
}

pub fn item(id: &str, number: u64, status: Status, review_status: ReviewStatus) -> WorkflowItem {
    WorkflowItem {
        id: id.to_string(),
        content: ItemContent {
            number,
            title: format!("Issue {number}"),
            body: format!("Body of issue {number}"),
            labels: vec![],
            item_type: ItemType::Feature,
            url: format!("https://github.com/acme/widgets/issues/{number}"),
        },
        status,
        review_status,
        implementation_phase: String::new(),
    }
}
