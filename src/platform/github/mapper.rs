use serde_json::Value;

use crate::platform::types::{self, ItemType, ReviewStatus, Status, WorkflowItem};

/// Field names configured for the project board.
pub struct FieldNames<'a> {
    pub status: &'a str,
    pub review_status: &'a str,
    pub phase: &'a str,
}

/// Map a `ProjectV2Item` GraphQL node to a workflow item.
///
/// Items whose content is not an issue (draft items, PRs) or whose status
/// option is unknown are dropped.
pub fn map_item(node: &Value, fields: &FieldNames<'_>) -> Option<WorkflowItem> {
    let id = node["id"].as_str()?.to_string();
    let content = &node["content"];
    let number = content["number"].as_u64()?;

    let labels: Vec<String> = content["labels"]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|l| l["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let mut status = None;
    let mut review_status = ReviewStatus::Empty;
    let mut implementation_phase = String::new();

    for value in node["fieldValues"]["nodes"].as_array().into_iter().flatten() {
        let field_name = value["field"]["name"].as_str().unwrap_or_default();
        if field_name == fields.status {
            status = value["name"].as_str().and_then(Status::from_label);
        } else if field_name == fields.review_status {
            review_status = value["name"]
                .as_str()
                .and_then(ReviewStatus::from_label)
                .unwrap_or_default();
        } else if field_name == fields.phase {
            implementation_phase = value["text"].as_str().unwrap_or_default().trim().to_string();
        }
    }

    Some(WorkflowItem {
        id,
        content: types::ItemContent {
            number,
            title: content["title"].as_str().unwrap_or_default().to_string(),
            body: content["body"].as_str().unwrap_or_default().to_string(),
            item_type: ItemType::from_labels(&labels),
            labels,
            url: content["url"].as_str().unwrap_or_default().to_string(),
        },
        status: status?,
        review_status,
        implementation_phase,
    })
}

pub fn map_comment(comment: octocrab::models::issues::Comment) -> types::Comment {
    types::Comment {
        id: comment.id.into_inner(),
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
        created_at: comment.created_at,
    }
}

pub fn map_pull_request(pr: octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        title: pr.title.clone().unwrap_or_default(),
        body: pr.body.clone().unwrap_or_default(),
        url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        head_branch: pr.head.ref_field.clone(),
        base_branch: pr.base.ref_field.clone(),
    }
}

pub fn map_review_comment(c: &Value) -> types::ReviewComment {
    types::ReviewComment {
        author: c["user"]["login"].as_str().unwrap_or("unknown").to_string(),
        body: c["body"].as_str().unwrap_or("").to_string(),
        path: c["path"].as_str().map(|s| s.to_string()),
        line: c["line"].as_u64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: FieldNames<'static> = FieldNames {
        status: "Status",
        review_status: "Review Status",
        phase: "Implementation Phase",
    };

    #[test]
    fn test_map_item_reads_field_values() {
        let node = json!({
            "id": "PVTI_1",
            "content": {
                "number": 42,
                "title": "Add export",
                "body": "Please add CSV export",
                "url": "https://github.com/acme/app/issues/42",
                "labels": { "nodes": [{ "name": "bug" }] }
            },
            "fieldValues": { "nodes": [
                { "name": "Implementation", "field": { "name": "Status" } },
                { "name": "Request Changes", "field": { "name": "Review Status" } },
                { "text": "2/4", "field": { "name": "Implementation Phase" } },
                {}
            ]}
        });

        let item = map_item(&node, &FIELDS).unwrap();
        assert_eq!(item.id, "PVTI_1");
        assert_eq!(item.issue_number(), 42);
        assert_eq!(item.status, Status::Implementation);
        assert_eq!(item.review_status, ReviewStatus::RequestChanges);
        assert_eq!(item.implementation_phase, "2/4");
        assert_eq!(item.content.item_type, ItemType::Bug);
    }

    #[test]
    fn test_map_item_skips_draft_items() {
        let node = json!({
            "id": "PVTI_2",
            "content": { "title": "Draft" },
            "fieldValues": { "nodes": [] }
        });
        assert!(map_item(&node, &FIELDS).is_none());
    }
}
