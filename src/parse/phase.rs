use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Position within a multi-phase implementation, stored on the board as `N/M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseProgress {
    pub current: u32,
    pub total: u32,
}

impl PhaseProgress {
    pub fn new(current: u32, total: u32) -> Option<Self> {
        (current >= 1 && current <= total).then_some(Self { current, total })
    }

    pub fn is_last(&self) -> bool {
        self.current == self.total
    }

    /// The following phase, or `None` when this is the last one.
    pub fn next(&self) -> Option<Self> {
        Self::new(self.current + 1, self.total)
    }
}

impl fmt::Display for PhaseProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}

/// Parse `"N/M"`. Anything malformed, zero, or with `N > M` is `None`.
pub fn parse_phase_string(s: &str) -> Option<PhaseProgress> {
    let (current, total) = s.trim().split_once('/')?;
    let current: u32 = current.trim().parse().ok()?;
    let total: u32 = total.trim().parse().ok()?;
    PhaseProgress::new(current, total)
}

/// One slice of a multi-phase feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationPhase {
    pub order: u32,
    pub total: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files_affected: Vec<String>,
}

fn phase_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^(#{2,4})[ \t]*(?:\*\*)?phase[ \t]+(\d+)[ \t]*[:.)\-]?[ \t]*(.*?)(?:\*\*)?[ \t]*$")
            .expect("valid regex")
    })
}

fn files_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[ \t]*[*_]*files(?:[ \t]+affected)?[*_]*[ \t]*:?[*_]*[ \t]*$").expect("valid regex")
    })
}

/// Recover phases from tech-design markdown.
///
/// Phases are headings of the form `### Phase N: Title`. The text under a
/// heading up to the next heading of the same or a higher level is the
/// description, except for a bulleted list following a `Files:` line,
/// which becomes `files_affected`. Returns `None` when no phase headings
/// exist.
pub fn parse_phases_from_markdown(markdown: &str) -> Option<Vec<ImplementationPhase>> {
    let headings: Vec<_> = phase_heading_re()
        .captures_iter(markdown)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let level = c.get(1)?.as_str().len();
            let order: u32 = c.get(2)?.as_str().parse().ok()?;
            let title = c.get(3).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            Some((whole.start(), whole.end(), level, order, title))
        })
        .collect();

    if headings.is_empty() {
        return None;
    }

    let total = headings.len() as u32;
    let mut phases = Vec::with_capacity(headings.len());

    for (i, (_, body_start, level, order, title)) in headings.iter().enumerate() {
        let limit = headings
            .get(i + 1)
            .map(|h| h.0)
            .unwrap_or(markdown.len());
        let body = section_body(&markdown[*body_start..limit], *level);
        let (description, files_affected) = split_files(body);

        phases.push(ImplementationPhase {
            order: *order,
            total,
            title: if title.is_empty() {
                format!("Phase {order}")
            } else {
                title.clone()
            },
            description,
            files_affected,
        });
    }

    Some(phases)
}

/// Cut a phase body at the first heading whose level is `<= level`.
fn section_body(text: &str, level: usize) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if offset > 0 && hashes > 0 && hashes <= level && trimmed[hashes..].starts_with([' ', '\t']) {
            return &text[..offset];
        }
        offset += line.len();
    }
    text
}

fn split_files(body: &str) -> (String, Vec<String>) {
    let mut description = Vec::new();
    let mut files = Vec::new();
    let mut in_files = false;

    for line in body.lines() {
        if files_label_re().is_match(line) {
            in_files = true;
            continue;
        }
        let trimmed = line.trim_start();
        let bullet = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "));

        match bullet {
            Some(item) if in_files => {
                let path = item
                    .trim()
                    .trim_matches('`')
                    .split(['`', ' ', '\t'])
                    .next()
                    .unwrap_or_default();
                if !path.is_empty() {
                    files.push(path.to_string());
                }
            }
            _ => {
                if in_files && !trimmed.is_empty() {
                    in_files = false;
                }
                if !in_files {
                    description.push(line);
                }
            }
        }
    }

    (description.join("\n").trim().to_string(), files)
}

/// Check that phases run exactly `1..=n` with a consistent total.
pub fn validate_phases(phases: &[ImplementationPhase]) -> Result<()> {
    if phases.is_empty() {
        return Err(AppError::Phase("phase list is empty".to_string()));
    }
    let n = phases.len() as u32;
    for (i, phase) in phases.iter().enumerate() {
        let expected = i as u32 + 1;
        if phase.order != expected {
            return Err(AppError::Phase(format!(
                "phases are not contiguous: expected phase {expected}, found phase {}",
                phase.order
            )));
        }
        if phase.total != n {
            return Err(AppError::Phase(format!(
                "phase {} declares total {} but {n} phases exist",
                phase.order, phase.total
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phase_string_malformed() {
        for s in ["abc", "3/", "/3", "5/3", "0/2", "1/0", "", "1-2", "a/b", "-1/2"] {
            assert_eq!(parse_phase_string(s), None, "{s:?}");
        }
    }

    #[test]
    fn test_phase_progress_next() {
        let p = parse_phase_string("2/4").unwrap();
        assert_eq!(p.next().unwrap().to_string(), "3/4");
        assert!(parse_phase_string("4/4").unwrap().next().is_none());
        assert!(parse_phase_string(" 4 / 4 ").unwrap().is_last());
    }

    const DESIGN: &str = "\
# Tech Design

## Overview
Split the exporter.

## Implementation Phases

### Phase 1: Data layer
Add the export query.

**Files:**
- `src/db/export.rs`
- src/db/mod.rs (register module)

### Phase 2: API endpoint
Expose `/export`.

Files affected:
- `src/api/export.rs`

## Risks
None.
";

    #[test]
    fn test_parse_phases_from_markdown() {
        let phases = parse_phases_from_markdown(DESIGN).unwrap();
        assert_eq!(phases.len(), 2);

        assert_eq!(phases[0].order, 1);
        assert_eq!(phases[0].total, 2);
        assert_eq!(phases[0].title, "Data layer");
        assert_eq!(phases[0].description, "Add the export query.");
        assert_eq!(phases[0].files_affected, vec!["src/db/export.rs", "src/db/mod.rs"]);

        assert_eq!(phases[1].title, "API endpoint");
        assert_eq!(phases[1].files_affected, vec!["src/api/export.rs"]);
        assert!(!phases[1].description.contains("Risks"));
    }

    #[test]
    fn test_parse_phases_absent() {
        assert!(parse_phases_from_markdown("# Design\n\nNo phases here.").is_none());
    }

    #[test]
    fn test_validate_phases() {
        let mut phases = parse_phases_from_markdown(DESIGN).unwrap();
        assert!(validate_phases(&phases).is_ok());

        phases[1].order = 3;
        assert!(matches!(validate_phases(&phases), Err(AppError::Phase(_))));

        assert!(validate_phases(&[]).is_err());
    }

    #[test]
    fn test_phase_serde_uses_camel_case() {
        let phase = ImplementationPhase {
            order: 1,
            total: 1,
            title: "All".to_string(),
            description: String::new(),
            files_affected: vec!["a.rs".to_string()],
        };
        let json = serde_json::to_value(&phase).unwrap();
        assert_eq!(json["filesAffected"][0], "a.rs");
    }
}
