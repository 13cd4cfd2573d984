//! Extraction of structured data from free-form agent output and from the
//! marker-delimited text the workflows write into issues.

pub mod extract;
pub mod phase;
pub mod sections;

pub use extract::{
    extract_clarification, extract_json, extract_markdown, extract_review, parse_review_decision,
    ClarificationRequest, ReviewDecision, CLARIFICATION_MARKER,
};
pub use phase::{parse_phase_string, ImplementationPhase, PhaseProgress};
pub use sections::{
    build_updated_issue_body, extract_original_description, extract_product_design,
    extract_product_development, extract_tech_design, BodySection,
};
