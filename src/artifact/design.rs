use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::parse::sections::{self, BodySection};

/// Design documents produced by the design workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DesignKind {
    ProductDevelopment,
    ProductDesign,
    TechDesign,
}

impl DesignKind {
    pub const ALL: [DesignKind; 3] = [
        DesignKind::ProductDevelopment,
        DesignKind::ProductDesign,
        DesignKind::TechDesign,
    ];

    pub fn slug(&self) -> &'static str {
        self.section().name()
    }

    pub fn title(&self) -> &'static str {
        match self {
            DesignKind::ProductDevelopment => "Product Development",
            DesignKind::ProductDesign => "Product Design",
            DesignKind::TechDesign => "Technical Design",
        }
    }

    pub fn from_title(title: &str) -> Option<Self> {
        let title = title.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.title().eq_ignore_ascii_case(title) || k.slug() == title)
    }

    pub fn section(&self) -> BodySection {
        match self {
            DesignKind::ProductDevelopment => BodySection::ProductDevelopment,
            DesignKind::ProductDesign => BodySection::ProductDesign,
            DesignKind::TechDesign => BodySection::TechDesign,
        }
    }
}

impl std::fmt::Display for DesignKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Design documents stored as files in the repository under
/// `{design_docs_dir}/issue-{N}/{kind}.md`.
#[derive(Debug, Clone)]
pub struct DesignDocStore {
    repo_root: PathBuf,
    dir: PathBuf,
}

impl DesignDocStore {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            repo_root: config.repo_path.clone(),
            dir: config.design_docs_dir.clone(),
        }
    }

    /// Path relative to the repository root, as committed.
    pub fn relative_path(&self, issue_number: u64, kind: DesignKind) -> PathBuf {
        self.dir
            .join(format!("issue-{issue_number}"))
            .join(format!("{}.md", kind.slug()))
    }

    fn absolute_path(&self, issue_number: u64, kind: DesignKind) -> PathBuf {
        self.repo_root.join(self.relative_path(issue_number, kind))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Write a design document and return its relative path.
    pub async fn write(&self, issue_number: u64, kind: DesignKind, content: &str) -> Result<PathBuf> {
        let path = self.absolute_path(issue_number, kind);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to create design dir: {e}")))?;
        }

        let mut content = content.trim_end().to_string();
        content.push('\n');
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to write {}: {e}", path.display())))?;

        Ok(self.relative_path(issue_number, kind))
    }

    pub async fn read(&self, issue_number: u64, kind: DesignKind) -> Result<Option<String>> {
        let path = self.absolute_path(issue_number, kind);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Workspace(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// The current design: the committed file first, then the issue-body
    /// section. Read errors fall through to the issue body.
    pub async fn load(&self, issue_number: u64, kind: DesignKind, issue_body: &str) -> Option<String> {
        match self.read(issue_number, kind).await {
            Ok(Some(content)) if !content.trim().is_empty() => return Some(content),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(issue = issue_number, kind = %kind, error = %e, "Could not read design file");
            }
        }
        let parsed = sections::SectionedText::parse(issue_body);
        parsed
            .get(kind.section().name())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}
