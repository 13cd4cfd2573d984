//! JSON schemas handed to the agents for their final answer.

use serde_json::{json, Value};

fn clarification_properties() -> Value {
    json!({
        "needsClarification": { "type": "boolean" },
        "clarification": {
            "type": "object",
            "properties": {
                "context": { "type": "string" },
                "question": { "type": "string" },
                "options": { "type": "array", "items": { "type": "string" } },
                "recommendation": { "type": "string" }
            },
            "required": ["question"]
        }
    })
}

fn object(properties: Value, required: &[&str], clarifiable: bool) -> Value {
    let mut properties = properties;
    if clarifiable {
        if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), clarification_properties()) {
            props.extend(extra);
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn phase_items() -> Value {
    json!({
        "type": "object",
        "properties": {
            "order": { "type": "integer", "minimum": 1 },
            "total": { "type": "integer", "minimum": 1 },
            "title": { "type": "string" },
            "description": { "type": "string" },
            "filesAffected": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["order", "total", "title"]
    })
}

/// Product development, product design and technical design documents.
/// Only the technical design carries `phases`.
pub fn design(with_phases: bool) -> Value {
    let mut properties = json!({
        "design": { "type": "string" },
        "summary": { "type": "string" }
    });
    if with_phases {
        properties["phases"] = json!({ "type": "array", "items": phase_items() });
    }
    object(properties, &[], true)
}

pub fn bug_investigation() -> Value {
    object(
        json!({
            "rootCause": { "type": "string" },
            "affectedFiles": { "type": "array", "items": { "type": "string" } },
            "proposedFix": { "type": "string" },
            "confidence": { "type": "string", "enum": ["low", "medium", "high"] },
            "report": { "type": "string" }
        }),
        &[],
        true,
    )
}

pub fn implementation() -> Value {
    object(
        json!({
            "success": { "type": "boolean" },
            "summary": { "type": "string" },
            "filesChanged": { "type": "array", "items": { "type": "string" } },
            "prDescription": { "type": "string" }
        }),
        &["success"],
        true,
    )
}

pub fn pr_review() -> Value {
    object(
        json!({
            "decision": { "type": "string", "enum": ["approve", "request-changes", "comment-only"] },
            "review": { "type": "string" },
            "summary": { "type": "string" }
        }),
        &["decision", "review"],
        false,
    )
}

pub fn triage() -> Value {
    object(
        json!({
            "domain": { "type": "string" },
            "priority": { "type": "string", "enum": ["critical", "high", "medium", "low"] },
            "size": { "type": "string", "enum": ["XS", "S", "M", "L", "XL"] },
            "complexity": { "type": "string", "enum": ["low", "medium", "high"] },
            "summary": { "type": "string" }
        }),
        &["domain", "priority", "size", "complexity"],
        false,
    )
}

pub fn workflow_review() -> Value {
    object(
        json!({
            "findings": { "type": "string" },
            "recommendations": { "type": "array", "items": { "type": "string" } },
            "summary": { "type": "string" }
        }),
        &["findings", "summary"],
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_design_schema_phases_only_for_tech_design() {
        assert!(design(true)["properties"]["phases"].is_object());
        assert!(design(false)["properties"]["phases"].is_null());
        assert!(design(false)["properties"]["needsClarification"].is_object());
    }

    #[test]
    fn test_review_schema_has_no_clarification() {
        let schema = pr_review();
        assert!(schema["properties"]["needsClarification"].is_null());
        assert_eq!(schema["required"], json!(["decision", "review"]));
    }
}
