use std::collections::HashMap;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::ProjectManager;

use super::mapper::{self, FieldNames};

const ITEM_FIELDS: &str = r#"
  id
  content {
    ... on Issue {
      number
      title
      body
      url
      labels(first: 20) { nodes { name } }
    }
  }
  fieldValues(first: 20) {
    nodes {
      ... on ProjectV2ItemFieldSingleSelectValue {
        name
        field { ... on ProjectV2FieldCommon { name } }
      }
      ... on ProjectV2ItemFieldTextValue {
        text
        field { ... on ProjectV2FieldCommon { name } }
      }
    }
  }
"#;

#[derive(Debug)]
struct SelectField {
    id: String,
    /// option name -> option id
    options: HashMap<String, String>,
}

#[derive(Debug)]
struct ProjectIds {
    project_id: String,
    status: SelectField,
    review_status: Option<SelectField>,
    phase_field_id: Option<String>,
}

/// GitHub Projects v2 board plus the repository's issues and pull requests.
pub struct GitHubProject {
    config: GitHubConfig,
    client: Octocrab,
    ids: OnceCell<ProjectIds>,
}

impl GitHubProject {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
            ids: OnceCell::new(),
        })
    }

    fn ids(&self) -> Result<&ProjectIds> {
        self.ids
            .get()
            .ok_or_else(|| AppError::Internal("GitHub project used before init()".to_string()))
    }

    fn field_names(&self) -> FieldNames<'_> {
        FieldNames {
            status: &self.config.status_field,
            review_status: &self.config.review_status_field,
            phase: &self.config.phase_field,
        }
    }

    /// Run a GraphQL query and return its `data` object.
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let response: Value = self
            .client
            .graphql(&json!({ "query": query, "variables": variables }))
            .await?;

        if let Some(errors) = response.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let messages = errors
                    .iter()
                    .filter_map(|e| e["message"].as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(AppError::GitHubApi(format!("GraphQL error: {messages}")));
            }
        }

        Ok(response["data"].clone())
    }

    async fn load_ids(&self) -> Result<ProjectIds> {
        let owner_kind = if self.config.owner_is_org {
            "organization"
        } else {
            "user"
        };
        let query = format!(
            r#"query($owner: String!, $number: Int!) {{
                {owner_kind}(login: $owner) {{
                    projectV2(number: $number) {{
                        id
                        fields(first: 50) {{
                            nodes {{
                                ... on ProjectV2FieldCommon {{ id name }}
                                ... on ProjectV2SingleSelectField {{ id name options {{ id name }} }}
                            }}
                        }}
                    }}
                }}
            }}"#
        );

        let data = self
            .graphql(
                &query,
                json!({ "owner": self.config.owner, "number": self.config.project_number }),
            )
            .await?;

        let project = &data[owner_kind]["projectV2"];
        let project_id = project["id"].as_str().ok_or_else(|| {
            AppError::Config(format!(
                "Project #{} not found for {}",
                self.config.project_number, self.config.owner
            ))
        })?;

        let fields = project["fields"]["nodes"].as_array().cloned().unwrap_or_default();
        let find = |name: &str| fields.iter().find(|f| f["name"].as_str() == Some(name));
        let select = |field: &Value| SelectField {
            id: field["id"].as_str().unwrap_or_default().to_string(),
            options: field["options"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|o| Some((o["name"].as_str()?.to_string(), o["id"].as_str()?.to_string())))
                .collect(),
        };

        let status = find(&self.config.status_field).map(select).ok_or_else(|| {
            AppError::Config(format!("Project has no '{}' field", self.config.status_field))
        })?;
        let review_status = find(&self.config.review_status_field).map(select);
        let phase_field_id = find(&self.config.phase_field)
            .and_then(|f| f["id"].as_str())
            .map(str::to_string);

        if review_status.is_none() {
            tracing::warn!(
                field = %self.config.review_status_field,
                "Project has no review status field; review-gated flows are disabled"
            );
        }

        Ok(ProjectIds {
            project_id: project_id.to_string(),
            status,
            review_status,
            phase_field_id,
        })
    }

    async fn set_single_select(&self, item_id: &str, field: &SelectField, option: &str) -> Result<()> {
        let option_id = field.options.get(option).ok_or_else(|| {
            AppError::Config(format!("Project field has no option named '{option}'"))
        })?;
        let ids = self.ids()?;

        self.graphql(
            r#"mutation($project: ID!, $item: ID!, $field: ID!, $option: String!) {
                updateProjectV2ItemFieldValue(input: {
                    projectId: $project, itemId: $item, fieldId: $field,
                    value: { singleSelectOptionId: $option }
                }) { projectV2Item { id } }
            }"#,
            json!({ "project": ids.project_id, "item": item_id, "field": field.id, "option": option_id }),
        )
        .await?;
        Ok(())
    }

    async fn clear_field(&self, item_id: &str, field_id: &str) -> Result<()> {
        let ids = self.ids()?;
        self.graphql(
            r#"mutation($project: ID!, $item: ID!, $field: ID!) {
                clearProjectV2ItemFieldValue(input: {
                    projectId: $project, itemId: $item, fieldId: $field
                }) { projectV2Item { id } }
            }"#,
            json!({ "project": ids.project_id, "item": item_id, "field": field_id }),
        )
        .await?;
        Ok(())
    }

    fn review_field(&self) -> Result<&SelectField> {
        self.ids()?
            .review_status
            .as_ref()
            .ok_or_else(|| AppError::Config("Project has no review status field".to_string()))
    }

    fn phase_field(&self) -> Result<&str> {
        self.ids()?
            .phase_field_id
            .as_deref()
            .ok_or_else(|| AppError::Config("Project has no implementation phase field".to_string()))
    }
}

#[async_trait]
impl ProjectManager for GitHubProject {
    async fn init(&self) -> Result<()> {
        let ids = self.load_ids().await?;
        tracing::info!(
            project = %ids.project_id,
            review_status_field = ids.review_status.is_some(),
            phase_field = ids.phase_field_id.is_some(),
            "GitHub project initialized"
        );
        // A second init() is a no-op.
        let _ = self.ids.set(ids);
        Ok(())
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<WorkflowItem>> {
        let ids = self.ids()?;
        let query = format!(
            r#"query($project: ID!, $cursor: String) {{
                node(id: $project) {{
                    ... on ProjectV2 {{
                        items(first: 100, after: $cursor) {{
                            pageInfo {{ hasNextPage endCursor }}
                            nodes {{ {ITEM_FIELDS} }}
                        }}
                    }}
                }}
            }}"#
        );

        let fields = self.field_names();
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let data = self
                .graphql(&query, json!({ "project": ids.project_id, "cursor": cursor }))
                .await?;
            let page = &data["node"]["items"];

            items.extend(
                page["nodes"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|node| mapper::map_item(node, &fields))
                    .filter(|item| filter.matches(item)),
            );

            if page["pageInfo"]["hasNextPage"].as_bool() != Some(true) {
                break;
            }
            cursor = page["pageInfo"]["endCursor"].as_str().map(str::to_string);
        }

        Ok(items)
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<WorkflowItem>> {
        let query = format!(
            r#"query($item: ID!) {{
                node(id: $item) {{ ... on ProjectV2Item {{ {ITEM_FIELDS} }} }}
            }}"#
        );
        let data = self.graphql(&query, json!({ "item": item_id })).await?;
        Ok(mapper::map_item(&data["node"], &self.field_names()))
    }

    async fn update_item_status(&self, item_id: &str, status: Status) -> Result<()> {
        let field = &self.ids()?.status;
        self.set_single_select(item_id, field, status.label()).await
    }

    async fn update_item_review_status(&self, item_id: &str, status: ReviewStatus) -> Result<()> {
        if status == ReviewStatus::Empty {
            return self.clear_item_review_status(item_id).await;
        }
        let field = self.review_field()?;
        self.set_single_select(item_id, field, status.label()).await
    }

    async fn clear_item_review_status(&self, item_id: &str) -> Result<()> {
        let field_id = self.review_field()?.id.clone();
        self.clear_field(item_id, &field_id).await
    }

    fn has_review_status_field(&self) -> bool {
        self.ids
            .get()
            .map(|ids| ids.review_status.is_some())
            .unwrap_or(false)
    }

    async fn set_implementation_phase(&self, item_id: &str, phase: &str) -> Result<()> {
        let field_id = self.phase_field()?.to_string();
        let ids = self.ids()?;
        self.graphql(
            r#"mutation($project: ID!, $item: ID!, $field: ID!, $text: String!) {
                updateProjectV2ItemFieldValue(input: {
                    projectId: $project, itemId: $item, fieldId: $field,
                    value: { text: $text }
                }) { projectV2Item { id } }
            }"#,
            json!({ "project": ids.project_id, "item": item_id, "field": field_id, "text": phase }),
        )
        .await?;
        Ok(())
    }

    async fn clear_implementation_phase(&self, item_id: &str) -> Result<()> {
        let field_id = self.phase_field()?.to_string();
        self.clear_field(item_id, &field_id).await
    }

    async fn get_implementation_phase(&self, item_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_item(item_id)
            .await?
            .map(|item| item.implementation_phase)
            .filter(|p| !p.is_empty()))
    }

    async fn find_open_pr_for_issue(&self, issue_number: u64) -> Result<Option<PullRequest>> {
        let page = self
            .client
            .pulls(&self.config.owner, &self.config.repo)
            .list()
            .state(octocrab::params::State::Open)
            .per_page(100)
            .send()
            .await?;
        let pulls = self.client.all_pages(page).await?;

        let branch_prefix = crate::artifact::branch::feature_branch_prefix(issue_number);
        Ok(pulls.into_iter().map(mapper::map_pull_request).find(|pr| {
            crate::parse::extract::closing_issue_number(&pr.body) == Some(issue_number)
                || pr.head_branch.starts_with(&branch_prefix)
        }))
    }

    async fn get_issue_comments(&self, issue_number: u64) -> Result<Vec<Comment>> {
        let page = self
            .client
            .issues(&self.config.owner, &self.config.repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;
        let comments = self.client.all_pages(page).await?;
        Ok(comments.into_iter().map(mapper::map_comment).collect())
    }

    async fn add_issue_comment(&self, issue_number: u64, body: &str) -> Result<u64> {
        let comment = self
            .client
            .issues(&self.config.owner, &self.config.repo)
            .create_comment(issue_number, body)
            .await?;
        Ok(comment.id.into_inner())
    }

    async fn update_issue_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        self.client
            .issues(&self.config.owner, &self.config.repo)
            .update_comment(octocrab::models::CommentId(comment_id), body)
            .await?;
        Ok(())
    }

    async fn update_issue_body(&self, issue_number: u64, body: &str) -> Result<()> {
        self.client
            .issues(&self.config.owner, &self.config.repo)
            .update(issue_number)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        let created = self
            .client
            .pulls(&self.config.owner, &self.config.repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        Ok(mapper::map_pull_request(created))
    }

    async fn get_pr_review_comments(&self, pr_number: u64) -> Result<Vec<ReviewComment>> {
        let url = format!(
            "/repos/{}/{}/pulls/{pr_number}/comments",
            self.config.owner, self.config.repo
        );
        let comments: Vec<Value> = self
            .client
            .get(&url, None::<&()>)
            .await
            .map_err(|e| AppError::GitHubApi(format!("Failed to fetch review comments: {e}")))?;

        Ok(comments.iter().map(mapper::map_review_comment).collect())
    }
}
