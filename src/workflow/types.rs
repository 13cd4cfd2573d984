use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::platform::types::{ReviewStatus, WorkflowItem};

/// The pipeline workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowName {
    BugInvestigation,
    ProductDevelopment,
    ProductDesign,
    TechDesign,
    Implement,
    PrReview,
    Triage,
    WorkflowReview,
}

impl WorkflowName {
    pub const ALL: [WorkflowName; 8] = [
        WorkflowName::BugInvestigation,
        WorkflowName::ProductDevelopment,
        WorkflowName::ProductDesign,
        WorkflowName::TechDesign,
        WorkflowName::Implement,
        WorkflowName::PrReview,
        WorkflowName::Triage,
        WorkflowName::WorkflowReview,
    ];

    /// Key used in configuration (`agents.workflows`, `agents.timeouts`).
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowName::BugInvestigation => "bug-investigation",
            WorkflowName::ProductDevelopment => "product-development",
            WorkflowName::ProductDesign => "product-design",
            WorkflowName::TechDesign => "tech-design",
            WorkflowName::Implement => "implement",
            WorkflowName::PrReview => "pr-review",
            WorkflowName::Triage => "triage",
            WorkflowName::WorkflowReview => "workflow-review",
        }
    }

    /// Section heading in the execution log.
    pub fn phase_label(&self) -> &'static str {
        match self {
            WorkflowName::BugInvestigation => "Bug Investigation",
            WorkflowName::ProductDevelopment => "Product Development",
            WorkflowName::ProductDesign => "Product Design",
            WorkflowName::TechDesign => "Technical Design",
            WorkflowName::Implement => "Implementation",
            WorkflowName::PrReview => "PR Review",
            WorkflowName::Triage => "Triage",
            WorkflowName::WorkflowReview => "Workflow Review",
        }
    }
}

impl FromStr for WorkflowName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| AppError::Config(format!("Unknown workflow: {s}")))
    }
}

impl std::fmt::Display for WorkflowName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing path for an eligible item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Flow A: nothing produced yet.
    New,
    /// Flow B: a human asked for changes.
    Feedback,
    /// Flow C: a clarification question was answered.
    Clarification,
    /// Waiting on a human answer; never processed.
    Blocked,
}

impl Flow {
    pub fn mode(&self) -> &'static str {
        match self {
            Flow::New => "new",
            Flow::Feedback => "feedback",
            Flow::Clarification => "clarification",
            Flow::Blocked => "blocked",
        }
    }
}

/// The standard mapping from review status to flow. Statuses that hand the
/// item to a human (waiting for review, approved, rejected) are not
/// eligible.
pub fn classify_review_status(review_status: ReviewStatus) -> Option<Flow> {
    match review_status {
        ReviewStatus::Empty => Some(Flow::New),
        ReviewStatus::RequestChanges => Some(Flow::Feedback),
        ReviewStatus::ClarificationReceived => Some(Flow::Clarification),
        ReviewStatus::WaitingForClarification => Some(Flow::Blocked),
        ReviewStatus::WaitingForReview | ReviewStatus::Approved | ReviewStatus::Rejected => None,
    }
}

/// Eligible items split by flow, each list in query order.
#[derive(Debug, Default)]
pub struct Partition {
    pub new: Vec<WorkflowItem>,
    pub feedback: Vec<WorkflowItem>,
    pub clarification: Vec<WorkflowItem>,
    pub blocked: Vec<WorkflowItem>,
}

impl Partition {
    pub fn build<F>(items: Vec<WorkflowItem>, classify: F) -> Self
    where
        F: Fn(&WorkflowItem) -> Option<Flow>,
    {
        let mut partition = Self::default();
        for item in items {
            match classify(&item) {
                Some(Flow::New) => partition.new.push(item),
                Some(Flow::Feedback) => partition.feedback.push(item),
                Some(Flow::Clarification) => partition.clarification.push(item),
                Some(Flow::Blocked) => partition.blocked.push(item),
                None => {}
            }
        }
        partition
    }

    /// Items that will be processed.
    pub fn eligible(&self) -> usize {
        self.new.len() + self.feedback.len() + self.clarification.len()
    }
}
