use serde::{Deserialize, Serialize};

/// Pipeline column an item sits in on the project board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Backlog,
    BugInvestigation,
    ProductDevelopment,
    ProductDesign,
    TechDesign,
    Implementation,
    PrReview,
    Done,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Backlog,
        Status::BugInvestigation,
        Status::ProductDevelopment,
        Status::ProductDesign,
        Status::TechDesign,
        Status::Implementation,
        Status::PrReview,
        Status::Done,
    ];

    /// Option name used by the project board's single-select field.
    pub fn label(&self) -> &'static str {
        match self {
            Status::Backlog => "Backlog",
            Status::BugInvestigation => "Bug Investigation",
            Status::ProductDevelopment => "Product Development",
            Status::ProductDesign => "Product Design",
            Status::TechDesign => "Technical Design",
            Status::Implementation => "Implementation",
            Status::PrReview => "PR Review",
            Status::Done => "Done",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.label().eq_ignore_ascii_case(label.trim()))
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Secondary state gating human review. `Empty` means "nothing pending".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStatus {
    #[default]
    Empty,
    WaitingForReview,
    Approved,
    RequestChanges,
    Rejected,
    WaitingForClarification,
    ClarificationReceived,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 7] = [
        ReviewStatus::Empty,
        ReviewStatus::WaitingForReview,
        ReviewStatus::Approved,
        ReviewStatus::RequestChanges,
        ReviewStatus::Rejected,
        ReviewStatus::WaitingForClarification,
        ReviewStatus::ClarificationReceived,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReviewStatus::Empty => "",
            ReviewStatus::WaitingForReview => "Waiting for Review",
            ReviewStatus::Approved => "Approved",
            ReviewStatus::RequestChanges => "Request Changes",
            ReviewStatus::Rejected => "Rejected",
            ReviewStatus::WaitingForClarification => "Waiting for Clarification",
            ReviewStatus::ClarificationReceived => "Clarification Received",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.label().eq_ignore_ascii_case(label.trim()))
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Empty => f.write_str("(none)"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    Feature,
    Bug,
}

impl ItemType {
    /// Bugs are tagged with a `bug` label; everything else is a feature.
    pub fn from_labels(labels: &[String]) -> Self {
        if labels.iter().any(|l| l.eq_ignore_ascii_case("bug")) {
            ItemType::Bug
        } else {
            ItemType::Feature
        }
    }
}

/// The issue backing a project item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemContent {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub item_type: ItemType,
    pub url: String,
}

/// A GitHub Project item under automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowItem {
    pub id: String,
    pub content: ItemContent,
    pub status: Status,
    pub review_status: ReviewStatus,
    /// Raw `"N/M"` string; empty when the item is not multi-phase.
    pub implementation_phase: String,
}

impl WorkflowItem {
    pub fn issue_number(&self) -> u64 {
        self.content.number
    }
}

/// Filter for listing project items.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Empty means every status.
    pub statuses: Vec<Status>,
}

impl ItemFilter {
    pub fn statuses(statuses: &[Status]) -> Self {
        Self {
            statuses: statuses.to_vec(),
        }
    }

    pub fn matches(&self, item: &WorkflowItem) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&item.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub author: String,
    pub body: String,
    pub path: Option<String>,
    pub line: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels_round_trip() {
        for status in Status::ALL {
            assert_eq!(Status::from_label(status.label()), Some(status));
        }
        assert_eq!(Status::from_label("pr review"), Some(Status::PrReview));
        assert_eq!(Status::from_label("Shipped"), None);
    }

    #[test]
    fn test_empty_review_status_label() {
        assert_eq!(ReviewStatus::from_label(""), Some(ReviewStatus::Empty));
        assert_eq!(
            ReviewStatus::from_label("Request Changes"),
            Some(ReviewStatus::RequestChanges)
        );
    }

    #[test]
    fn test_item_type_from_labels() {
        assert_eq!(ItemType::from_labels(&["Bug".to_string()]), ItemType::Bug);
        assert_eq!(ItemType::from_labels(&["ui".to_string()]), ItemType::Feature);
    }
}
