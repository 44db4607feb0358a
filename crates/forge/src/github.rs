//! GitHub / GitHub Enterprise capabilities.

use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::repository::default_branch;
use crate::{
    Error, ForgeApi, ListPage, PAGE_SIZE, Quota, RateLimitHeaders, Repository, Result,
    ServiceKind, SkipReason, endpoint, header_u64, page_items,
};

/// Repository object as returned by `GET /orgs/{org}/repos`.
#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    full_name: String,
    clone_url: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    pushed_at: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    topics: Option<Vec<String>>,
    #[serde(default)]
    visibility: Option<String>,
}

impl GitHubRepo {
    fn into_repository(self, org: &str) -> Repository {
        let visibility = self.visibility.unwrap_or_else(|| {
            if self.private {
                "private".to_string()
            } else {
                "public".to_string()
            }
        });
        Repository {
            name: self.name,
            full_name: self.full_name,
            clone_url: self.clone_url,
            html_url: self.html_url.unwrap_or_default(),
            platform: ServiceKind::GitHub,
            organization: org.to_string(),
            private: self.private,
            archived: self.archived,
            disabled: self.disabled,
            fork: self.fork,
            default_branch: self.default_branch.unwrap_or_else(default_branch),
            updated_at: self.updated_at,
            pushed_at: self.pushed_at,
            size_kb: self.size.unwrap_or(0),
            language: self.language,
            topics: self.topics.unwrap_or_default(),
            visibility,
            project_id: None,
            path_with_namespace: None,
        }
    }
}

/// Filtering applied during GitHub discovery.
fn skip_reason(repo: &Repository) -> Option<SkipReason> {
    if repo.archived {
        Some(SkipReason::Archived)
    } else if repo.disabled {
        Some(SkipReason::Disabled)
    } else if repo.size_kb == 0 {
        Some(SkipReason::Empty)
    } else {
        None
    }
}

/// GitHub capability set.
pub struct GitHub;

impl ForgeApi for GitHub {
    fn kind(&self) -> ServiceKind {
        ServiceKind::GitHub
    }

    fn accept(&self) -> &'static str {
        "application/vnd.github.v3+json"
    }

    fn auth_headers(&self, token: &str) -> Result<HeaderMap> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::InvalidCredential(format!("token contains invalid characters: {e}")))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn parse_quota_headers(&self, headers: &HeaderMap, names: &RateLimitHeaders) -> Option<Quota> {
        let remaining = header_u64(headers, names.remaining.as_deref()?)?;
        let limit = header_u64(headers, names.limit.as_deref()?)?;
        let reset_epoch = header_u64(headers, names.reset.as_deref()?)?;
        Some(Quota {
            remaining,
            limit: Some(limit),
            reset_epoch,
        })
    }

    fn list_url(&self, api_url: &str, org: &str) -> Result<Url> {
        endpoint(api_url, &["orgs", org, "repos"])
    }

    fn list_query(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("page", page.to_string()),
            ("per_page", PAGE_SIZE.to_string()),
            ("type", "all".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
        ]
    }

    fn parse_list_page(&self, org: &str, body: serde_json::Value) -> Result<ListPage> {
        let items = page_items(body)?;
        let mut page = ListPage {
            raw_count: items.len(),
            ..ListPage::default()
        };
        for item in items {
            let repo = match serde_json::from_value::<GitHubRepo>(item) {
                Ok(raw) => raw.into_repository(org),
                Err(e) => {
                    warn!(org, error = %e, "skipping malformed repository entry");
                    page.malformed += 1;
                    continue;
                }
            };
            match skip_reason(&repo) {
                Some(reason) => {
                    debug!(
                        repository = %repo.full_name,
                        reason = reason.label(),
                        "skipping repository"
                    );
                    page.skipped.push((repo.full_name, reason));
                }
                None => page.repositories.push(repo),
            }
        }
        Ok(page)
    }

    fn commit_url(&self, api_url: &str, repository: &Repository) -> Result<Url> {
        let (owner, name) = repository.full_name.split_once('/').ok_or_else(|| {
            Error::MalformedPayload(format!(
                "full_name {:?} is not owner/name",
                repository.full_name
            ))
        })?;
        endpoint(api_url, &["repos", owner, name, "commits"])
    }

    fn extract_commit_id(&self, body: &serde_json::Value) -> Option<String> {
        body.as_array()?
            .first()?
            .get("sha")?
            .as_str()
            .map(str::to_string)
    }
}
