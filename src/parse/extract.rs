use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // (?s) so the body spans lines; lazy so adjacent blocks stay separate.
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n(.*?)\r?\n[ \t]*```").expect("valid regex"))
}

fn decision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t>#*_-]*decision[*_ \t]*[:=][ \t*_`]*([a-z][a-z _-]*)").expect("valid regex")
    })
}

fn clarification_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<clarification>(.*?)</clarification>").expect("valid regex"))
}

fn closing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s+#(\d+)").expect("valid regex")
    })
}

/// Fenced code blocks in order of appearance, as `(language, body)`.
fn fenced_blocks(text: &str) -> impl Iterator<Item = (&str, &str)> {
    fence_re().captures_iter(text).filter_map(|c| {
        let lang = c.get(1)?.as_str();
        let body = c.get(2)?.as_str();
        Some((lang, body))
    })
}

/// Pull the first JSON object or array out of model output.
///
/// Tries, in order: fenced blocks (first one that parses wins), the whole
/// trimmed text, then the first balanced `{...}` span in the prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let parse = |s: &str| -> Option<Value> {
        serde_json::from_str::<Value>(s.trim())
            .ok()
            .filter(|v| v.is_object() || v.is_array())
    };

    for (lang, body) in fenced_blocks(text) {
        if lang.is_empty() || lang.eq_ignore_ascii_case("json") {
            if let Some(v) = parse(body) {
                return Some(v);
            }
        }
    }

    if let Some(v) = parse(text) {
        return Some(v);
    }

    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_object_end(&text[start..]) {
            if let Some(v) = parse(&text[start..start + end]) {
                return Some(v);
            }
        }
        search_from = start + 1;
    }

    None
}

/// Deserialize the first JSON payload into `T`.
pub fn extract_json_as<T: DeserializeOwned>(text: &str) -> Option<T> {
    extract_json(text).and_then(|v| serde_json::from_value(v).ok())
}

/// Byte length of the balanced `{...}` span starting at `s[0]`, string-aware.
fn balanced_object_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a markdown document out of model output.
///
/// A fenced `markdown`/`md` block wins; otherwise everything from the first
/// heading onwards. Returns `None` when neither is present.
pub fn extract_markdown(text: &str) -> Option<String> {
    for (lang, body) in fenced_blocks(text) {
        if lang.eq_ignore_ascii_case("markdown") || lang.eq_ignore_ascii_case("md") {
            let body = body.trim();
            if !body.is_empty() {
                return Some(body.to_string());
            }
        }
    }

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            let doc = text[offset..].trim();
            return (!doc.is_empty()).then(|| doc.to_string());
        }
        offset += line.len();
    }

    None
}

/// Outcome of an automated PR review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
    CommentOnly,
}

impl ReviewDecision {
    pub fn label(&self) -> &'static str {
        match self {
            ReviewDecision::Approve => "Approved",
            ReviewDecision::RequestChanges => "Changes requested",
            ReviewDecision::CommentOnly => "Comments only",
        }
    }
}

/// Map a decision word to the closed decision set.
///
/// Anything not recognised is `CommentOnly`: unknown text never approves and
/// never triggers automated rework.
pub fn parse_review_decision(raw: &str) -> ReviewDecision {
    let normalized = raw
        .trim()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_ascii_lowercase()
        .replace(['_', '-'], " ");

    match normalized.as_str() {
        "approve" | "approved" | "lgtm" => ReviewDecision::Approve,
        "request changes" | "changes requested" | "changes required" | "reject" | "rejected" => {
            ReviewDecision::RequestChanges
        }
        _ => ReviewDecision::CommentOnly,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReview {
    pub decision: ReviewDecision,
    pub summary: String,
}

/// Read a review decision from agent output.
///
/// Looks for a JSON payload with a `decision` field, then a `Decision: ...`
/// marker line. Without either, the decision is `CommentOnly`.
pub fn extract_review(text: &str) -> ExtractedReview {
    if let Some(v) = extract_json(text) {
        if let Some(decision) = v["decision"].as_str() {
            let summary = v["summary"]
                .as_str()
                .or_else(|| v["review"].as_str())
                .unwrap_or_default()
                .to_string();
            return ExtractedReview {
                decision: parse_review_decision(decision),
                summary,
            };
        }
    }

    let decision = decision_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| parse_review_decision(m.as_str()))
        .unwrap_or(ReviewDecision::CommentOnly);

    ExtractedReview {
        decision,
        summary: text.trim().to_string(),
    }
}

/// First line of every clarification question the workflows post.
pub const CLARIFICATION_MARKER: &str = "<!-- agent-workflow:clarification -->";

/// A question the agent cannot answer on its own.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationRequest {
    #[serde(default)]
    pub context: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

impl ClarificationRequest {
    /// Read an explicit clarification signal from a structured payload:
    /// `{"needsClarification": true, "clarification": {...}}`.
    pub fn from_structured(value: &Value) -> Option<Self> {
        if value["needsClarification"].as_bool() != Some(true) {
            return None;
        }
        let clarification = &value["clarification"];
        if let Some(question) = clarification.as_str() {
            return Some(Self {
                question: question.to_string(),
                ..Default::default()
            });
        }
        serde_json::from_value::<Self>(clarification.clone())
            .ok()
            .filter(|c| !c.question.trim().is_empty())
    }

    /// Markdown body for the issue comment asking the question.
    pub fn to_comment(&self) -> String {
        let mut body = format!("{CLARIFICATION_MARKER}\n## Clarification needed\n\n");
        if !self.context.trim().is_empty() {
            body.push_str(self.context.trim());
            body.push_str("\n\n");
        }
        body.push_str(&format!("**Question:** {}\n", self.question.trim()));
        if !self.options.is_empty() {
            body.push_str("\n**Options:**\n");
            for (i, option) in self.options.iter().enumerate() {
                body.push_str(&format!("{}. {}\n", i + 1, option));
            }
        }
        if let Some(rec) = &self.recommendation {
            body.push_str(&format!("\n**Recommendation:** {rec}\n"));
        }
        body.push_str(
            "\nReply on this issue and set the review status to *Clarification Received* to continue.",
        );
        body
    }
}

/// Detect an explicit clarification request in raw text.
///
/// Only two signals count: a JSON payload with `needsClarification: true`,
/// or a `<clarification>...</clarification>` block. Prose that merely asks
/// a question is not a clarification request.
pub fn extract_clarification(text: &str) -> Option<ClarificationRequest> {
    if let Some(v) = extract_json(text) {
        if let Some(c) = ClarificationRequest::from_structured(&v) {
            return Some(c);
        }
    }

    let inner = clarification_tag_re().captures(text)?.get(1)?.as_str().trim();
    if inner.is_empty() {
        return None;
    }
    Some(ClarificationRequest {
        question: inner.to_string(),
        ..Default::default()
    })
}

/// Issue number from a `Closes #N` / `Fixes #N` / `Resolves #N` reference.
pub fn closing_issue_number(text: &str) -> Option<u64> {
    closing_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
