//! Phase resolution across the places phase data is persisted.
//!
//! Sources are tried in order and the first one that yields a non-empty
//! list wins: the workflow-item record, then the phase comment on the issue,
//! then the tech-design markdown itself. A failing source is logged and
//! skipped.

use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::comments::{find_marked_comment, parse_phase_comment, PHASES_MARKER};
use crate::artifact::design::{DesignDocStore, DesignKind};
use crate::error::Result;
use crate::parse::phase::{parse_phases_from_markdown, ImplementationPhase};
use crate::platform::ProjectManager;
use crate::store::WorkflowStore;

/// What a source needs to know about the issue.
#[derive(Debug, Clone, Copy)]
pub struct PhaseQuery<'a> {
    pub issue_number: u64,
    pub issue_body: &'a str,
}

#[async_trait]
pub trait PhaseSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn phases(&self, query: PhaseQuery<'_>) -> Result<Option<Vec<ImplementationPhase>>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPhases {
    pub source: &'static str,
    pub phases: Vec<ImplementationPhase>,
}

pub async fn resolve_phase_details(
    sources: &[Arc<dyn PhaseSource>],
    query: PhaseQuery<'_>,
) -> Option<ResolvedPhases> {
    for source in sources {
        match source.phases(query).await {
            Ok(Some(phases)) if !phases.is_empty() => {
                tracing::debug!(
                    issue = query.issue_number,
                    source = source.name(),
                    count = phases.len(),
                    "Resolved implementation phases"
                );
                return Some(ResolvedPhases {
                    source: source.name(),
                    phases,
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    issue = query.issue_number,
                    source = source.name(),
                    error = %e,
                    "Phase source failed, trying next"
                );
            }
        }
    }
    None
}

pub struct StorePhases(pub Arc<dyn WorkflowStore>);

#[async_trait]
impl PhaseSource for StorePhases {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn phases(&self, query: PhaseQuery<'_>) -> Result<Option<Vec<ImplementationPhase>>> {
        Ok(self.0.get(query.issue_number).await?.and_then(|r| r.phases))
    }
}

pub struct CommentPhases(pub Arc<dyn ProjectManager>);

#[async_trait]
impl PhaseSource for CommentPhases {
    fn name(&self) -> &'static str {
        "issue-comment"
    }

    async fn phases(&self, query: PhaseQuery<'_>) -> Result<Option<Vec<ImplementationPhase>>> {
        let comments = self.0.get_issue_comments(query.issue_number).await?;
        Ok(find_marked_comment(&comments, PHASES_MARKER).and_then(|c| parse_phase_comment(&c.body)))
    }
}

pub struct MarkdownPhases(pub Arc<DesignDocStore>);

#[async_trait]
impl PhaseSource for MarkdownPhases {
    fn name(&self) -> &'static str {
        "tech-design-markdown"
    }

    async fn phases(&self, query: PhaseQuery<'_>) -> Result<Option<Vec<ImplementationPhase>>> {
        Ok(self
            .0
            .load(query.issue_number, DesignKind::TechDesign, query.issue_body)
            .await
            .and_then(|md| parse_phases_from_markdown(&md)))
    }
}

/// The standard chain: database, issue comment, tech-design markdown.
pub fn default_sources(
    store: Arc<dyn WorkflowStore>,
    project: Arc<dyn ProjectManager>,
    designs: Arc<DesignDocStore>,
) -> Vec<Arc<dyn PhaseSource>> {
    vec![
        Arc::new(StorePhases(store)),
        Arc::new(CommentPhases(project)),
        Arc::new(MarkdownPhases(designs)),
    ]
}
