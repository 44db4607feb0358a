//! Normalized repository record shared by every service kind

use serde::{Deserialize, Serialize};

use crate::ServiceKind;

/// Uniform repository record produced by discovery.
///
/// GitLab records also keep the numeric project id and the fully namespaced
/// path; group/subgroup segments of `full_name` are not enough to address a
/// project unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    #[serde(default)]
    pub html_url: String,
    pub platform: ServiceKind,
    pub organization: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<String>,
    #[serde(default)]
    pub size_kb: u64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_with_namespace: Option<String>,
}

pub(crate) fn default_branch() -> String {
    "main".to_string()
}

fn default_visibility() -> String {
    "public".to_string()
}

impl Repository {
    /// Record with only identity and URL fields set; everything else defaulted.
    pub fn minimal(
        platform: ServiceKind,
        organization: &str,
        name: &str,
        clone_url: String,
        html_url: String,
    ) -> Self {
        Self {
            name: name.to_string(),
            full_name: format!("{organization}/{name}"),
            clone_url,
            html_url,
            platform,
            organization: organization.to_string(),
            private: false,
            archived: false,
            disabled: false,
            fork: false,
            default_branch: default_branch(),
            updated_at: None,
            pushed_at: None,
            size_kb: 0,
            language: None,
            topics: Vec::new(),
            visibility: default_visibility(),
            project_id: None,
            path_with_namespace: None,
        }
    }
}

/// Why discovery excluded a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Archived,
    Disabled,
    Empty,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Archived => "archived",
            SkipReason::Disabled => "disabled",
            SkipReason::Empty => "empty",
        }
    }
}
