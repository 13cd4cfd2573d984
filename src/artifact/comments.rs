//! Marker comments on issues: the artifact index pointing at design files,
//! and the structured phase list written by the technical design workflow.
//!
//! Each kind of comment carries a fixed marker on its first line. Writing
//! one updates the existing comment in place when the marker is found.

use crate::artifact::design::DesignKind;
use crate::error::Result;
use crate::parse::extract::extract_json;
use crate::parse::phase::ImplementationPhase;
use crate::platform::types::Comment;
use crate::platform::ProjectManager;

pub const ARTIFACT_MARKER: &str = "<!-- agent-workflow:artifacts -->";
pub const PHASES_MARKER: &str = "<!-- agent-workflow:phases -->";

pub fn find_marked_comment<'a>(comments: &'a [Comment], marker: &str) -> Option<&'a Comment> {
    comments.iter().find(|c| c.body.trim_start().starts_with(marker))
}

/// Create the comment carrying `marker`, or replace its body if it exists.
pub async fn upsert_marked_comment(
    project: &dyn ProjectManager,
    issue_number: u64,
    marker: &str,
    body: &str,
) -> Result<u64> {
    let comments = project.get_issue_comments(issue_number).await?;
    match find_marked_comment(&comments, marker) {
        Some(existing) => {
            project.update_issue_comment(existing.id, body).await?;
            Ok(existing.id)
        }
        None => project.add_issue_comment(issue_number, body).await,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub kind: DesignKind,
    pub path: String,
    pub status: String,
    pub updated: String,
}

pub fn render_artifact_comment(entries: &[ArtifactEntry]) -> String {
    let mut body = format!(
        "{ARTIFACT_MARKER}\n## Design Artifacts\n\n| Document | Path | Status | Updated |\n|---|---|---|---|\n"
    );
    for e in entries {
        body.push_str(&format!(
            "| {} | `{}` | {} | {} |\n",
            e.kind.title(),
            e.path,
            e.status,
            e.updated
        ));
    }
    body
}

/// Table rows of an artifact comment. Rows that do not name a known
/// document kind are ignored, so hand edits elsewhere are harmless.
pub fn parse_artifact_comment(body: &str) -> Vec<ArtifactEntry> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            let inner = line.strip_prefix('|')?.strip_suffix('|')?;
            let cells: Vec<&str> = inner.split('|').map(str::trim).collect();
            if cells.len() != 4 {
                return None;
            }
            let kind = DesignKind::from_title(cells[0])?;
            Some(ArtifactEntry {
                kind,
                path: cells[1].trim_matches('`').to_string(),
                status: cells[2].to_string(),
                updated: cells[3].to_string(),
            })
        })
        .collect()
}

/// Record a design document in the issue's artifact comment.
pub async fn upsert_artifact(
    project: &dyn ProjectManager,
    issue_number: u64,
    entry: ArtifactEntry,
) -> Result<u64> {
    let comments = project.get_issue_comments(issue_number).await?;
    let mut entries = find_marked_comment(&comments, ARTIFACT_MARKER)
        .map(|c| parse_artifact_comment(&c.body))
        .unwrap_or_default();

    match entries.iter_mut().find(|e| e.kind == entry.kind) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
    entries.sort_by_key(|e| DesignKind::ALL.iter().position(|k| *k == e.kind));

    let body = render_artifact_comment(&entries);
    match find_marked_comment(&comments, ARTIFACT_MARKER) {
        Some(existing) => {
            project.update_issue_comment(existing.id, &body).await?;
            Ok(existing.id)
        }
        None => project.add_issue_comment(issue_number, &body).await,
    }
}

pub fn render_phase_comment(phases: &[ImplementationPhase]) -> String {
    let mut body = format!("{PHASES_MARKER}\n## Implementation Phases\n\n");
    for phase in phases {
        body.push_str(&format!(
            "{}. **{}**{}\n",
            phase.order,
            phase.title,
            if phase.files_affected.is_empty() {
                String::new()
            } else {
                format!(" ({} files)", phase.files_affected.len())
            }
        ));
    }
    let json = serde_json::to_string_pretty(phases).unwrap_or_else(|_| "[]".to_string());
    body.push_str(&format!("\n```json\n{json}\n```\n"));
    body
}

/// Phase comment body for a design that no longer splits into phases.
/// It carries no JSON payload, so it never resolves to a phase list.
pub fn render_single_phase_comment() -> String {
    format!("{PHASES_MARKER}\n## Implementation Phases\n\nThe current technical design is implemented in a single pass.\n")
}

/// The phase list embedded in a phase comment. `None` when the payload is
/// missing, malformed or empty.
pub fn parse_phase_comment(body: &str) -> Option<Vec<ImplementationPhase>> {
    let value = extract_json(body)?;
    serde_json::from_value::<Vec<ImplementationPhase>>(value)
        .ok()
        .filter(|phases| !phases.is_empty())
}
