use std::path::{Path, PathBuf};

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::workspace::git;

/// Longest test output carried in an error.
const MAX_TEST_OUTPUT: usize = 4_000;

/// The local clone agents work in.
pub struct Workspace {
    root: PathBuf,
    default_branch: String,
    test_command: Option<String>,
    token: Option<String>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("default_branch", &self.default_branch)
            .field("test_command", &self.test_command)
            .finish()
    }
}

impl Workspace {
    pub fn new(config: &WorkspaceConfig, token: Option<String>) -> Self {
        Self {
            root: config.repo_path.clone(),
            default_branch: config.default_branch.clone(),
            test_command: config.test_command.clone(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Fails when the working tree has uncommitted or untracked changes.
    pub async fn ensure_clean(&self) -> Result<()> {
        if git::is_clean(&self.root).await? {
            Ok(())
        } else {
            Err(AppError::Workspace(format!(
                "Working tree at {} has uncommitted changes; commit or stash them first",
                self.root.display()
            )))
        }
    }

    /// Switch to the default branch and fast-forward it from origin.
    pub async fn pull_default_branch(&self) -> Result<()> {
        git::checkout(&self.root, &self.default_branch).await?;
        git::pull_fast_forward(&self.root, &self.default_branch, self.token.as_deref()).await?;
        tracing::info!(branch = %self.default_branch, "Pulled latest changes");
        Ok(())
    }

    /// Check out `branch`, creating it from `base` the first time.
    pub async fn prepare_branch(&self, branch: &str, base: &str) -> Result<()> {
        git::checkout_or_create(&self.root, branch, base).await?;
        tracing::info!(branch, base, "Checked out work branch");
        Ok(())
    }

    pub async fn current_branch(&self) -> Result<String> {
        git::current_branch(&self.root).await
    }

    /// Stage and commit everything. Returns `false` when there was nothing
    /// to commit.
    pub async fn commit_all(&self, message: &str) -> Result<bool> {
        if !git::has_changes(&self.root).await? {
            tracing::info!("No changes to commit");
            return Ok(false);
        }
        git::add_all(&self.root).await?;
        git::commit(&self.root, message).await?;
        Ok(true)
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool> {
        git::branch_exists(&self.root, branch).await
    }

    pub async fn push(&self, branch: &str, force: bool) -> Result<()> {
        git::push(&self.root, branch, self.token.as_deref(), force).await?;
        tracing::info!(branch, force, "Pushed branch");
        Ok(())
    }

    /// Leave the tree on the default branch for the next item.
    pub async fn return_to_default(&self) -> Result<()> {
        git::checkout(&self.root, &self.default_branch).await
    }

    /// Run the configured local test command with `sh -c`. No command
    /// configured counts as a pass.
    pub async fn run_tests(&self) -> Result<()> {
        let Some(command) = self.test_command.as_deref() else {
            tracing::debug!("No local test command configured");
            return Ok(());
        };

        tracing::info!(command, "Running local tests");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to run '{command}': {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(AppError::Workspace(format!(
            "Local tests failed ({}):\n{}",
            output.status,
            tail(&combined, MAX_TEST_OUTPUT)
        )))
    }
}

/// Last `max_bytes` of `text`, at a UTF-8 boundary.
fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
