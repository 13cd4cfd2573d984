//! Marker-delimited sections inside issue bodies.
//!
//! A section is written as
//!
//! ```text
//! <!-- agent-workflow:{name}:start -->
//! content
//! <!-- agent-workflow:{name}:end -->
//! ```
//!
//! Text outside any section is the preamble: the issue's original
//! description. Rendering a parsed document and parsing it again yields the
//! same document, so repeated upserts of the same content are no-ops.

use std::sync::OnceLock;

use regex::Regex;

const MARKER_PREFIX: &str = "agent-workflow";

fn start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<!--\s*agent-workflow:([a-z0-9-]+):start\s*-->").expect("valid regex")
    })
}

pub fn start_marker(name: &str) -> String {
    format!("<!-- {MARKER_PREFIX}:{name}:start -->")
}

pub fn end_marker(name: &str) -> String {
    format!("<!-- {MARKER_PREFIX}:{name}:end -->")
}

/// Sections the workflows write into an issue body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySection {
    ProductDevelopment,
    ProductDesign,
    TechDesign,
}

impl BodySection {
    pub fn name(&self) -> &'static str {
        match self {
            BodySection::ProductDevelopment => "product-development",
            BodySection::ProductDesign => "product-design",
            BodySection::TechDesign => "tech-design",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionedText {
    pub preamble: String,
    pub sections: Vec<Section>,
}

impl SectionedText {
    /// Parse text into preamble and sections.
    ///
    /// An unterminated start marker owns the rest of the text. Repeated
    /// section names keep the last occurrence.
    pub fn parse(text: &str) -> Self {
        let mut preamble_parts: Vec<&str> = Vec::new();
        let mut sections: Vec<Section> = Vec::new();
        let mut cursor = 0;

        while let Some(caps) = start_re().captures(&text[cursor..]) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let name = name.as_str().to_string();
            let start = cursor + whole.start();
            let body_start = cursor + whole.end();

            preamble_parts.push(&text[cursor..start]);

            let end = end_marker(&name);
            let (content, next) = match text[body_start..].find(&end) {
                Some(rel) => (&text[body_start..body_start + rel], body_start + rel + end.len()),
                None => (&text[body_start..], text.len()),
            };

            let section = Section {
                name,
                content: content.trim().to_string(),
            };
            match sections.iter_mut().find(|s| s.name == section.name) {
                Some(existing) => *existing = section,
                None => sections.push(section),
            }
            cursor = next;
        }
        preamble_parts.push(&text[cursor..]);

        let preamble = preamble_parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        Self { preamble, sections }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.content.as_str())
    }

    /// Replace a section in place, or append it.
    pub fn upsert(&mut self, name: &str, content: &str) {
        let content = content.trim().to_string();
        match self.sections.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.content = content,
            None => self.sections.push(Section {
                name: name.to_string(),
                content,
            }),
        }
    }

    pub fn render(&self) -> String {
        let mut blocks: Vec<String> = Vec::with_capacity(self.sections.len() + 1);
        if !self.preamble.is_empty() {
            blocks.push(self.preamble.clone());
        }
        for section in &self.sections {
            blocks.push(format!(
                "{}\n{}\n{}",
                start_marker(&section.name),
                section.content,
                end_marker(&section.name)
            ));
        }
        blocks.join("\n\n")
    }
}

/// Write `content` into `section` of an issue body, leaving everything else intact.
pub fn build_updated_issue_body(body: &str, section: BodySection, content: &str) -> String {
    let mut doc = SectionedText::parse(body);
    doc.upsert(section.name(), content);
    doc.render()
}

fn extract_section(body: &str, section: BodySection) -> Option<String> {
    SectionedText::parse(body)
        .get(section.name())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

pub fn extract_product_development(body: &str) -> Option<String> {
    extract_section(body, BodySection::ProductDevelopment)
}

pub fn extract_product_design(body: &str) -> Option<String> {
    extract_section(body, BodySection::ProductDesign)
}

pub fn extract_tech_design(body: &str) -> Option<String> {
    extract_section(body, BodySection::TechDesign)
}

/// The issue text as the reporter wrote it, without any agent sections.
pub fn extract_original_description(body: &str) -> String {
    SectionedText::parse(body).preamble
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_appends_then_replaces() {
        let body = "Users want CSV export.";
        let once = build_updated_issue_body(body, BodySection::ProductDesign, "# Design v1");
        assert!(once.starts_with("Users want CSV export.\n\n<!-- agent-workflow:product-design:start -->"));
        assert_eq!(extract_product_design(&once).as_deref(), Some("# Design v1"));

        let twice = build_updated_issue_body(&once, BodySection::ProductDesign, "# Design v2");
        assert_eq!(extract_product_design(&twice).as_deref(), Some("# Design v2"));
        assert_eq!(twice.matches("product-design:start").count(), 1);
        assert_eq!(extract_original_description(&twice), "Users want CSV export.");
    }

    #[test]
    fn test_update_is_idempotent() {
        let body = "Original\n\nmore text\n";
        let once = build_updated_issue_body(body, BodySection::TechDesign, "\n## Tech\n\nDetails\n");
        let twice = build_updated_issue_body(&once, BodySection::TechDesign, "## Tech\n\nDetails");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sections_keep_order_and_other_content() {
        let body = build_updated_issue_body("Desc", BodySection::ProductDesign, "PD");
        let body = build_updated_issue_body(&body, BodySection::TechDesign, "TD");
        let body = build_updated_issue_body(&body, BodySection::ProductDesign, "PD2");

        let doc = SectionedText::parse(&body);
        let names: Vec<_> = doc.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["product-design", "tech-design"]);
        assert_eq!(extract_tech_design(&body).as_deref(), Some("TD"));
        assert_eq!(extract_product_design(&body).as_deref(), Some("PD2"));
    }

    #[test]
    fn test_unterminated_section_owns_rest() {
        let body = "Intro\n<!-- agent-workflow:tech-design:start -->\npartial";
        assert_eq!(extract_tech_design(body).as_deref(), Some("partial"));
        assert_eq!(extract_original_description(body), "Intro");
    }

    #[test]
    fn test_empty_body() {
        let body = build_updated_issue_body("", BodySection::ProductDevelopment, "Spec");
        assert!(body.starts_with("<!-- agent-workflow:product-development:start -->"));
        assert_eq!(extract_original_description(&body), "");
        assert!(extract_tech_design(&body).is_none());
    }
}
