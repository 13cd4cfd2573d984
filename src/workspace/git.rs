use std::path::Path;

use git2::{
    BranchType, Cred, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository,
    Signature, StatusOptions,
};

use crate::error::{AppError, Result};

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    if name.is_empty() || name.contains("..") || name.contains(char::is_whitespace) {
        return Err(AppError::Git(format!("Invalid branch name: {name:?}")));
    }
    Ok(())
}

/// Credentials come from the GitHub token when one is configured and from
/// the user's git credential helper otherwise.
fn make_callbacks(token: Option<&str>) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, _allowed_types| match token {
        Some(token) => Cred::userpass_plaintext("x-access-token", token),
        None => {
            let config = git2::Config::open_default()?;
            Cred::credential_helper(&config, url, username_from_url)
        }
    });
    callbacks
}

fn make_fetch_options(token: Option<&str>) -> FetchOptions<'_> {
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(make_callbacks(token));
    opts
}

fn make_push_options(token: Option<&str>) -> PushOptions<'_> {
    let mut opts = PushOptions::new();
    opts.remote_callbacks(make_callbacks(token));
    opts
}

fn checkout_local(repo: &Repository, branch_name: &str) -> Result<()> {
    let refname = format!("refs/heads/{branch_name}");
    let obj = repo.revparse_single(&refname)?;
    repo.checkout_tree(&obj, None)?;
    repo.set_head(&refname)?;
    Ok(())
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Git(format!("{what} task panicked: {e}")))?
}

/// Whether the working tree has no staged, unstaged or untracked changes.
pub async fn is_clean(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();
    blocking("Status", move || {
        let repo = Repository::open(&dir)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let clean = repo.statuses(Some(&mut opts))?.is_empty();
        Ok(clean)
    })
    .await
}

/// Check if there are any staged or unstaged changes.
pub async fn has_changes(dir: &Path) -> Result<bool> {
    Ok(!is_clean(dir).await?)
}

pub async fn current_branch(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();
    blocking("Current-branch", move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        let name = head.shorthand().map(str::to_string);
        name.ok_or_else(|| AppError::Git("HEAD is not on a named branch".to_string()))
    })
    .await
}

pub async fn branch_exists(dir: &Path, branch_name: &str) -> Result<bool> {
    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    blocking("Branch-exists", move || {
        let repo = Repository::open(&dir)?;
        let found = repo.find_branch(&branch_name, BranchType::Local).is_ok();
        Ok(found)
    })
    .await
}

/// Checkout an existing local branch.
pub async fn checkout(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    blocking("Checkout", move || {
        let repo = Repository::open(&dir)?;
        checkout_local(&repo, &branch_name)
    })
    .await
}

/// Checkout `branch_name`, creating it when needed. An existing local branch
/// is reused as is; otherwise it starts from `origin/{branch_name}` if that was
/// fetched, and from `base` (local, then `origin/{base}`) failing that.
pub async fn checkout_or_create(dir: &Path, branch_name: &str, base: &str) -> Result<()> {
    validate_branch_name(branch_name)?;
    validate_branch_name(base)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let base = base.to_string();
    blocking("Checkout-or-create", move || {
        let repo = Repository::open(&dir)?;
        if repo.find_branch(&branch_name, BranchType::Local).is_err() {
            let start = [
                format!("refs/remotes/origin/{branch_name}"),
                format!("refs/heads/{base}"),
                format!("refs/remotes/origin/{base}"),
            ]
            .iter()
            .find_map(|r| repo.find_reference(r).ok())
            .ok_or_else(|| AppError::Git(format!("Base branch '{base}' not found")))?;
            let commit = start.peel_to_commit()?;
            repo.branch(&branch_name, &commit, false)?;
        }
        checkout_local(&repo, &branch_name)
    })
    .await
}

/// Stage all changes, deletions included.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();
    blocking("Add-all", move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    })
    .await
}

/// Commit the index on top of HEAD.
pub async fn commit(dir: &Path, message: &str) -> Result<()> {
    let dir = dir.to_path_buf();
    let message = message.to_string();
    blocking("Commit", move || {
        let repo = Repository::open(&dir)?;
        let sig = Signature::now("agent-workflow[bot]", "agent-workflow[bot]@users.noreply.github.com")?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let parent = repo.head()?.peel_to_commit()?;
        repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(())
    })
    .await
}

/// Push a local branch to origin. `force` overwrites diverged history.
pub async fn push(dir: &Path, branch_name: &str, token: Option<&str>, force: bool) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.map(str::to_string);
    blocking("Push", move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let plus = if force { "+" } else { "" };
        let refspec = format!("{plus}refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(token.as_deref());
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
}

/// Fetch `origin/{branch_name}` and fast-forward the local branch to it.
/// The branch must be checked out. Diverged history is an error.
pub async fn pull_fast_forward(dir: &Path, branch_name: &str, token: Option<&str>) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.map(str::to_string);
    blocking("Pull", move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("+refs/heads/{branch_name}:refs/remotes/origin/{branch_name}");
        let mut fetch_opts = make_fetch_options(token.as_deref());
        remote.fetch(&[&refspec], Some(&mut fetch_opts), None)?;

        let fetched = repo.find_reference(&format!("refs/remotes/origin/{branch_name}"))?;
        let annotated = repo.reference_to_annotated_commit(&fetched)?;
        let (analysis, _) = repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(AppError::Git(format!(
                "Local '{branch_name}' has diverged from origin; refusing to pull"
            )));
        }

        let refname = format!("refs/heads/{branch_name}");
        let mut local = repo.find_reference(&refname)?;
        local.set_target(annotated.id(), "agent-workflow: fast-forward")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo(path: &Path) {
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path, &opts).unwrap();
        fs::write(path.join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
    }

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/issue-42-phase-2").is_ok());
        assert!(validate_branch_name("docs/issue-42").is_ok());
    }

    #[tokio::test]
    async fn test_clean_detects_untracked_file() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(is_clean(tmp.path()).await.unwrap());

        fs::write(tmp.path().join("new.txt"), "x").unwrap();
        assert!(!is_clean(tmp.path()).await.unwrap());
        assert!(has_changes(tmp.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_branch_exists() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(branch_exists(tmp.path(), "main").await.unwrap());
        assert!(!branch_exists(tmp.path(), "docs/issue-3").await.unwrap());

        checkout_or_create(tmp.path(), "docs/issue-3", "main").await.unwrap();
        assert!(branch_exists(tmp.path(), "docs/issue-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_checkout_or_create_reuses_branch() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());

        checkout_or_create(tmp.path(), "feature/issue-1", "main").await.unwrap();
        assert_eq!(current_branch(tmp.path()).await.unwrap(), "feature/issue-1");

        fs::write(tmp.path().join("work.txt"), "phase one").unwrap();
        add_all(tmp.path()).await.unwrap();
        commit(tmp.path(), "phase one").await.unwrap();

        checkout(tmp.path(), "main").await.unwrap();
        assert!(!tmp.path().join("work.txt").exists());

        checkout_or_create(tmp.path(), "feature/issue-1", "main").await.unwrap();
        assert!(tmp.path().join("work.txt").exists());
    }

    #[tokio::test]
    async fn test_create_from_missing_base_fails() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(checkout_or_create(tmp.path(), "feature/x", "develop").await.is_err());
        assert!(!branch_exists(tmp.path(), "feature/x").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_all_stages_deletions() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());

        fs::remove_file(tmp.path().join("README.md")).unwrap();
        add_all(tmp.path()).await.unwrap();
        commit(tmp.path(), "remove readme").await.unwrap();
        assert!(is_clean(tmp.path()).await.unwrap());
    }
}
