use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::ProjectManager;

/// Process-local project board.
///
/// Backs offline previews and the integration tests; every setter call is
/// counted so callers can assert that a run mutated nothing.
pub struct InMemoryProject {
    inner: Mutex<Inner>,
    review_status_field: bool,
}

#[derive(Default)]
struct Inner {
    items: Vec<WorkflowItem>,
    comments: HashMap<u64, Vec<Comment>>,
    pull_requests: Vec<(u64, PullRequest, bool)>,
    review_comments: HashMap<u64, Vec<ReviewComment>>,
    next_id: u64,
    mutations: Vec<String>,
}

impl Default for InMemoryProject {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProject {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1000,
                ..Default::default()
            }),
            review_status_field: true,
        }
    }

    pub fn without_review_status_field() -> Self {
        Self {
            review_status_field: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal("in-memory project lock poisoned".to_string()))
    }

    pub fn insert_item(&self, item: WorkflowItem) {
        if let Ok(mut inner) = self.lock() {
            inner.items.push(item);
        }
    }

    /// Seed a comment as if a human had written it.
    pub fn seed_comment(&self, issue_number: u64, author: &str, body: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.comments.entry(issue_number).or_default().push(Comment {
                id,
                author: author.to_string(),
                body: body.to_string(),
                created_at: chrono::Utc::now(),
            });
        }
    }

    /// Seed an open pull request linked to an issue.
    pub fn seed_pull_request(&self, issue_number: u64, pr: PullRequest) {
        if let Ok(mut inner) = self.lock() {
            inner.pull_requests.push((issue_number, pr, true));
        }
    }

    pub fn seed_review_comment(&self, pr_number: u64, comment: ReviewComment) {
        if let Ok(mut inner) = self.lock() {
            inner.review_comments.entry(pr_number).or_default().push(comment);
        }
    }

    pub fn item(&self, item_id: &str) -> Option<WorkflowItem> {
        self.lock()
            .ok()
            .and_then(|inner| inner.items.iter().find(|i| i.id == item_id).cloned())
    }

    pub fn comments(&self, issue_number: u64) -> Vec<Comment> {
        self.lock()
            .map(|inner| inner.comments.get(&issue_number).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.lock()
            .map(|inner| inner.pull_requests.iter().map(|(_, pr, _)| pr.clone()).collect())
            .unwrap_or_default()
    }

    /// Status / review-status / phase setter calls, in order.
    pub fn mutations(&self) -> Vec<String> {
        self.lock().map(|inner| inner.mutations.clone()).unwrap_or_default()
    }

    fn with_item<F>(&self, item_id: &str, what: String, f: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowItem),
    {
        let mut inner = self.lock()?;
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| AppError::GitHubApi(format!("Unknown project item: {item_id}")))?;
        f(item);
        inner.mutations.push(what);
        Ok(())
    }
}

#[async_trait]
impl ProjectManager for InMemoryProject {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<WorkflowItem>> {
        let inner = self.lock()?;
        Ok(inner.items.iter().filter(|i| filter.matches(i)).cloned().collect())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<WorkflowItem>> {
        Ok(self.item(item_id))
    }

    async fn update_item_status(&self, item_id: &str, status: Status) -> Result<()> {
        self.with_item(item_id, format!("status:{item_id}:{status}"), |item| {
            item.status = status;
        })
    }

    async fn update_item_review_status(&self, item_id: &str, status: ReviewStatus) -> Result<()> {
        self.with_item(item_id, format!("review:{item_id}:{status}"), |item| {
            item.review_status = status;
        })
    }

    async fn clear_item_review_status(&self, item_id: &str) -> Result<()> {
        self.with_item(item_id, format!("review:{item_id}:clear"), |item| {
            item.review_status = ReviewStatus::Empty;
        })
    }

    fn has_review_status_field(&self) -> bool {
        self.review_status_field
    }

    async fn set_implementation_phase(&self, item_id: &str, phase: &str) -> Result<()> {
        self.with_item(item_id, format!("phase:{item_id}:{phase}"), |item| {
            item.implementation_phase = phase.to_string();
        })
    }

    async fn clear_implementation_phase(&self, item_id: &str) -> Result<()> {
        self.with_item(item_id, format!("phase:{item_id}:clear"), |item| {
            item.implementation_phase.clear();
        })
    }

    async fn get_implementation_phase(&self, item_id: &str) -> Result<Option<String>> {
        Ok(self
            .item(item_id)
            .map(|i| i.implementation_phase)
            .filter(|p| !p.is_empty()))
    }

    async fn find_open_pr_for_issue(&self, issue_number: u64) -> Result<Option<PullRequest>> {
        let inner = self.lock()?;
        Ok(inner
            .pull_requests
            .iter()
            .find(|(issue, _, open)| *issue == issue_number && *open)
            .map(|(_, pr, _)| pr.clone()))
    }

    async fn get_issue_comments(&self, issue_number: u64) -> Result<Vec<Comment>> {
        Ok(self.comments(issue_number))
    }

    async fn add_issue_comment(&self, issue_number: u64, body: &str) -> Result<u64> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.comments.entry(issue_number).or_default().push(Comment {
            id,
            author: "agent-workflow[bot]".to_string(),
            body: body.to_string(),
            created_at: chrono::Utc::now(),
        });
        Ok(id)
    }

    async fn update_issue_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let comment = inner
            .comments
            .values_mut()
            .flat_map(|c| c.iter_mut())
            .find(|c| c.id == comment_id)
            .ok_or_else(|| AppError::GitHubApi(format!("Unknown comment: {comment_id}")))?;
        comment.body = body.to_string();
        Ok(())
    }

    async fn update_issue_body(&self, issue_number: u64, body: &str) -> Result<()> {
        let mut inner = self.lock()?;
        for item in inner.items.iter_mut().filter(|i| i.content.number == issue_number) {
            item.content.body = body.to_string();
        }
        Ok(())
    }

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let number = inner.next_id;
        let created = PullRequest {
            number,
            title: pr.title.clone(),
            body: pr.body.clone(),
            url: format!("https://example.invalid/pull/{number}"),
            head_branch: pr.head_branch.clone(),
            base_branch: pr.base_branch.clone(),
        };
        let issue = crate::parse::extract::closing_issue_number(&pr.body).unwrap_or(0);
        inner.pull_requests.push((issue, created.clone(), true));
        Ok(created)
    }

    async fn get_pr_review_comments(&self, pr_number: u64) -> Result<Vec<ReviewComment>> {
        let inner = self.lock()?;
        Ok(inner.review_comments.get(&pr_number).cloned().unwrap_or_default())
    }
}
