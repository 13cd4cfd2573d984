pub mod github;
pub mod memory;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// Project-management backend: the board holding workflow items plus the
/// repository's issues and pull requests.
///
/// Status, review status and implementation phase are only ever changed
/// through the setters here.
#[async_trait]
pub trait ProjectManager: Send + Sync {
    /// Resolve project and field ids. Must be called once before anything else.
    async fn init(&self) -> Result<()>;

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<WorkflowItem>>;

    async fn get_item(&self, item_id: &str) -> Result<Option<WorkflowItem>>;

    async fn update_item_status(&self, item_id: &str, status: Status) -> Result<()>;

    async fn update_item_review_status(&self, item_id: &str, status: ReviewStatus) -> Result<()>;

    async fn clear_item_review_status(&self, item_id: &str) -> Result<()>;

    /// Whether the board has a review-status field at all.
    fn has_review_status_field(&self) -> bool;

    async fn set_implementation_phase(&self, item_id: &str, phase: &str) -> Result<()>;

    async fn clear_implementation_phase(&self, item_id: &str) -> Result<()>;

    async fn get_implementation_phase(&self, item_id: &str) -> Result<Option<String>>;

    async fn find_open_pr_for_issue(&self, issue_number: u64) -> Result<Option<PullRequest>>;

    async fn get_issue_comments(&self, issue_number: u64) -> Result<Vec<Comment>>;

    /// Post a comment on an issue or PR, returning the new comment id.
    async fn add_issue_comment(&self, issue_number: u64, body: &str) -> Result<u64>;

    async fn update_issue_comment(&self, comment_id: u64, body: &str) -> Result<()>;

    async fn update_issue_body(&self, issue_number: u64, body: &str) -> Result<()>;

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest>;

    async fn get_pr_review_comments(&self, pr_number: u64) -> Result<Vec<ReviewComment>>;
}
