use crate::artifact::DesignKind;
use crate::parse::{ImplementationPhase, PhaseProgress};
use crate::platform::types::{Comment, PullRequest, ReviewComment, WorkflowItem};

const CLARIFICATION_INSTRUCTIONS: &str = r#"## If you need clarification
If the request is ambiguous in a way that changes the outcome, do not guess.
Answer with `needsClarification: true` and a `clarification` object holding
`context`, `question`, `options` (2-4 concrete choices) and `recommendation`.
Only ask when the answer genuinely changes what you would produce."#;

/// Material a revision or continuation run works from.
#[derive(Debug, Default, Clone)]
pub struct FeedbackContext<'a> {
    /// The previous version of the artifact being revised.
    pub previous: Option<&'a str>,
    /// Human comments left since the previous version.
    pub comments: &'a [Comment],
    /// The question that was asked and the answer that came back.
    pub clarification: Option<&'a str>,
}

fn issue_header(repo: &str, item: &WorkflowItem) -> String {
    format!(
        "You are working on repository `{repo}`.\n\n## Issue #{number}: {title}\n\n{body}",
        number = item.issue_number(),
        title = item.content.title,
        body = if item.content.body.trim().is_empty() {
            "(no description)"
        } else {
            item.content.body.trim()
        },
    )
}

fn format_comments(comments: &[Comment]) -> String {
    comments
        .iter()
        .map(|c| format!("**@{}** ({}):\n{}", c.author, c.created_at.format("%Y-%m-%d %H:%M"), c.body.trim()))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn feedback_section(feedback: &FeedbackContext<'_>) -> String {
    let mut out = String::new();
    if let Some(previous) = feedback.previous {
        out.push_str(&format!("\n\n## Previous Version\n{}", previous.trim()));
    }
    if !feedback.comments.is_empty() {
        out.push_str(&format!(
            "\n\n## Feedback To Address\n{}",
            format_comments(feedback.comments)
        ));
    }
    if let Some(answer) = feedback.clarification {
        out.push_str(&format!(
            "\n\n## Clarification Received\n{}\n\nContinue the work using this answer. Do not ask the same question again.",
            answer.trim()
        ));
    }
    out
}

fn design_instructions(kind: DesignKind) -> &'static str {
    match kind {
        DesignKind::ProductDevelopment => {
            "Turn the request into a product development document: the problem, \
             who it is for, success criteria, scope and explicit non-goals."
        }
        DesignKind::ProductDesign => {
            "Write a product design: user flows, screens and states, copy, edge cases \
             and acceptance criteria. Stay at the product level; do not design code."
        }
        DesignKind::TechDesign => {
            "Write a technical design: affected modules, data model changes, APIs, \
             risks and a test plan. For size L or XL work, split the implementation \
             into phases using headings of the form `## Phase N: Title`, each with a \
             short description and a `Files:` list, and return them in `phases`."
        }
    }
}

/// Prompt for one of the three design documents.
pub fn design_prompt(
    repo: &str,
    kind: DesignKind,
    item: &WorkflowItem,
    upstream: &[(DesignKind, String)],
    feedback: &FeedbackContext<'_>,
) -> String {
    let upstream_section = upstream
        .iter()
        .map(|(k, doc)| format!("\n\n## Approved {}\n{}", k.title(), doc.trim()))
        .collect::<String>();

    format!(
        r#"{header}{upstream_section}{feedback_section}

## Task
{instructions}

Explore the codebase first so the document matches how the project is built.
Do not modify any files.

Return the full document as markdown in `design`, and a one-paragraph
`summary` of what changed compared to the previous version (or of the
document if it is new).

{CLARIFICATION_INSTRUCTIONS}"#,
        header = issue_header(repo, item),
        feedback_section = feedback_section(feedback),
        instructions = design_instructions(kind),
    )
}

/// Prompt for root-causing a bug report without fixing it.
pub fn bug_investigation_prompt(repo: &str, item: &WorkflowItem, feedback: &FeedbackContext<'_>) -> String {
    format!(
        r#"{header}{feedback_section}

## Task
Investigate this bug report. Reproduce it by reading the code paths involved,
identify the root cause and the smallest safe fix. Do not modify any files.

Return `rootCause`, `affectedFiles`, `proposedFix`, `confidence` (low, medium
or high) and a markdown `report` suitable for posting on the issue.

{CLARIFICATION_INSTRUCTIONS}"#,
        header = issue_header(repo, item),
        feedback_section = feedback_section(feedback),
    )
}

/// Material an implementation run works from.
#[derive(Debug, Default, Clone)]
pub struct ImplementationContext<'a> {
    pub tech_design: Option<&'a str>,
    pub product_design: Option<&'a str>,
    pub phase: Option<(&'a ImplementationPhase, PhaseProgress)>,
    pub branch: &'a str,
    pub review_comments: &'a [ReviewComment],
}

pub fn implementation_prompt(
    repo: &str,
    item: &WorkflowItem,
    context: &ImplementationContext<'_>,
    feedback: &FeedbackContext<'_>,
) -> String {
    let mut sections = String::new();
    if let Some(design) = context.product_design {
        sections.push_str(&format!("\n\n## Product Design\n{}", design.trim()));
    }
    if let Some(design) = context.tech_design {
        sections.push_str(&format!("\n\n## Technical Design\n{}", design.trim()));
    }
    if let Some((phase, progress)) = context.phase {
        let files = if phase.files_affected.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nFiles expected to change:\n{}",
                phase
                    .files_affected
                    .iter()
                    .map(|f| format!("- {f}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };
        sections.push_str(&format!(
            "\n\n## Current Phase ({progress}): {}\n{}{files}\n\nImplement only this phase. \
             Later phases will build on top of your branch.",
            phase.title,
            phase.description.trim(),
        ));
    }
    if !context.review_comments.is_empty() {
        let comments = context
            .review_comments
            .iter()
            .map(|c| match (&c.path, c.line) {
                (Some(path), Some(line)) => format!("- `{path}:{line}` @{}: {}", c.author, c.body.trim()),
                (Some(path), None) => format!("- `{path}` @{}: {}", c.author, c.body.trim()),
                _ => format!("- @{}: {}", c.author, c.body.trim()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push_str(&format!("\n\n## Review Comments To Address\n{comments}"));
    }

    format!(
        r#"{header}{sections}{feedback_section}

## Task
You are on branch `{branch}`. Implement the change described above.

## Guidelines
- Make minimal, focused changes that follow the existing code style.
- Do not modify files unrelated to the issue.
- Do not commit; the working tree is committed for you.
- Run the project's fast checks if they exist and fix what they report.

Return `success`, a short `summary` of the change, `filesChanged`, and a
markdown `prDescription`.

{CLARIFICATION_INSTRUCTIONS}"#,
        header = issue_header(repo, item),
        feedback_section = feedback_section(feedback),
        branch = context.branch,
    )
}

/// Prompt for an automated review of an open pull request.
pub fn pr_review_prompt(
    repo: &str,
    item: &WorkflowItem,
    pr: &PullRequest,
    tech_design: Option<&str>,
    phase: Option<PhaseProgress>,
) -> String {
    let design = tech_design
        .map(|d| format!("\n\n## Technical Design\n{}", d.trim()))
        .unwrap_or_default();
    let phase = phase
        .map(|p| format!("\n\nThis pull request covers implementation phase {p}."))
        .unwrap_or_default();

    format!(
        r#"{header}{design}

## Pull Request #{number}: {title}
Branch `{head}` into `{base}`.{phase}

{body}

## Task
Review the changes on `{head}` against `{base}` (`git diff {base}...{head}`).
Check correctness, fit with the design, tests and obvious regressions.
Do not modify any files.

Return `decision` (approve, request-changes or comment-only), a markdown
`review` to post on the pull request, and a one-line `summary`."#,
        header = issue_header(repo, item),
        number = pr.number,
        title = pr.title,
        head = pr.head_branch,
        base = pr.base_branch,
        body = pr.body.trim(),
    )
}

pub fn triage_prompt(repo: &str, item: &WorkflowItem) -> String {
    format!(
        r#"{header}

## Task
Triage this issue. Explore the codebase enough to estimate the work.

Return `domain` (the area of the product it touches), `priority` (critical,
high, medium or low), `size` (XS, S, M, L or XL), `complexity` (low, medium
or high) and a short markdown `summary` explaining the estimate.
Do not modify any files."#,
        header = issue_header(repo, item),
    )
}

/// Prompt for reviewing how the automated workflow handled an issue, from its
/// execution log.
pub fn workflow_review_prompt(repo: &str, item: &WorkflowItem, execution_log: &str) -> String {
    format!(
        r#"{header}

## Execution Log
{execution_log}

## Task
Review how the automated agents handled this issue end to end. Look for
wasted work, repeated failures, prompts that led agents astray and token
spend out of proportion to the change.

Return a markdown `findings` report, a list of concrete `recommendations`,
and a one-line `summary`. Do not modify any files."#,
        header = issue_header(repo, item),
    )
}
