//! GitLab / self-managed GitLab capabilities.
//!
//! Group listings include subgroups and are never filtered: the projects
//! endpoint does not expose disabled/empty flags in the same shape as GitHub.

use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::warn;

use crate::repository::default_branch;
use crate::{
    Error, ForgeApi, ListPage, PAGE_SIZE, Quota, RateLimitHeaders, Repository, Result,
    ServiceKind, endpoint, header_u64, page_items,
};

/// Project object as returned by `GET /groups/{id}/projects`.
#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
    name: String,
    path: String,
    path_with_namespace: String,
    http_url_to_repo: String,
    #[serde(default)]
    web_url: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    topics: Option<Vec<String>>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    last_activity_at: Option<String>,
    #[serde(default)]
    forked_from_project: Option<serde_json::Value>,
}

impl GitLabProject {
    fn into_repository(self, org: &str) -> Repository {
        let private = matches!(self.visibility.as_deref(), Some("private" | "internal"));
        Repository {
            name: self.name,
            full_name: format!("{org}/{}", self.path),
            clone_url: self.http_url_to_repo,
            html_url: self.web_url.unwrap_or_default(),
            platform: ServiceKind::GitLab,
            organization: org.to_string(),
            private,
            archived: self.archived,
            disabled: false,
            fork: self.forked_from_project.is_some_and(|v| !v.is_null()),
            default_branch: self.default_branch.unwrap_or_else(default_branch),
            updated_at: self.last_activity_at,
            pushed_at: None,
            size_kb: 0,
            language: None,
            topics: self.topics.unwrap_or_default(),
            visibility: self.visibility.unwrap_or_else(|| "private".to_string()),
            project_id: Some(self.id),
            path_with_namespace: Some(self.path_with_namespace),
        }
    }
}

/// GitLab capability set.
pub struct GitLab;

impl ForgeApi for GitLab {
    fn kind(&self) -> ServiceKind {
        ServiceKind::GitLab
    }

    fn accept(&self) -> &'static str {
        "application/json"
    }

    fn auth_headers(&self, token: &str) -> Result<HeaderMap> {
        let mut value = HeaderValue::from_str(token)
            .map_err(|e| Error::InvalidCredential(format!("token contains invalid characters: {e}")))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("private-token"), value);
        Ok(headers)
    }

    fn parse_quota_headers(&self, headers: &HeaderMap, names: &RateLimitHeaders) -> Option<Quota> {
        let remaining = header_u64(headers, names.remaining.as_deref()?)?;
        let reset_epoch = header_u64(headers, names.reset.as_deref()?)?;
        // A configured limit header must parse; an unconfigured one is simply unknown.
        let limit = match names.limit.as_deref() {
            Some(name) => Some(header_u64(headers, name)?),
            None => None,
        };
        Some(Quota {
            remaining,
            limit,
            reset_epoch,
        })
    }

    fn list_url(&self, api_url: &str, org: &str) -> Result<Url> {
        endpoint(api_url, &["groups", org, "projects"])
    }

    fn list_query(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("page", page.to_string()),
            ("per_page", PAGE_SIZE.to_string()),
            ("include_subgroups", "true".to_string()),
        ]
    }

    fn parse_list_page(&self, org: &str, body: serde_json::Value) -> Result<ListPage> {
        let items = page_items(body)?;
        let mut page = ListPage {
            raw_count: items.len(),
            ..ListPage::default()
        };
        for item in items {
            match serde_json::from_value::<GitLabProject>(item) {
                Ok(project) => page.repositories.push(project.into_repository(org)),
                Err(e) => {
                    warn!(org, error = %e, "skipping malformed project entry");
                    page.malformed += 1;
                }
            }
        }
        Ok(page)
    }

    /// Prefers the numeric project id, then the namespaced path, then `full_name`.
    fn commit_url(&self, api_url: &str, repository: &Repository) -> Result<Url> {
        let identifier = match (repository.project_id, &repository.path_with_namespace) {
            (Some(id), _) => id.to_string(),
            (None, Some(path)) if !path.is_empty() => path.clone(),
            _ => repository.full_name.clone(),
        };
        endpoint(api_url, &["projects", &identifier, "repository", "commits"])
    }

    fn extract_commit_id(&self, body: &serde_json::Value) -> Option<String> {
        body.as_array()?
            .first()?
            .get("id")?
            .as_str()
            .map(str::to_string)
    }
}
