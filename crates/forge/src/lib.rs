//! Hosting-service abstraction for repository discovery
//!
//! Defines the closed set of supported service kinds and the `ForgeApi`
//! capability trait each kind implements: auth header shape, quota header
//! parsing, listing endpoint paging and commit-id extraction. Callers never
//! branch on the kind themselves; they dispatch through `ServiceKind::api()`.
//!
//! The crate is pure: it builds URLs and parses payloads, but performs no I/O.

pub mod binding;
pub mod classify;
pub mod error;
pub mod github;
pub mod gitlab;
pub mod repository;

pub use binding::{BindingSettings, RateLimitHeaders, ServiceBinding};
pub use classify::{ResponseClass, classify_response};
pub use error::{Error, Result};
pub use github::GitHub;
pub use gitlab::GitLab;
pub use repository::{Repository, SkipReason};

use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

/// Fixed page size for every listing endpoint.
pub const PAGE_SIZE: u32 = 100;

/// User-Agent sent on every API request.
pub const USER_AGENT: &str = "ghmon-cli";

/// Supported hosting-service kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// GitHub.com or GitHub Enterprise
    GitHub,
    /// GitLab.com or self-managed GitLab
    GitLab,
}

impl ServiceKind {
    /// Label used in logs, metrics and the `platform` field of records.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::GitHub => "github",
            ServiceKind::GitLab => "gitlab",
        }
    }

    /// Capability implementation for this kind.
    pub fn api(&self) -> &'static dyn ForgeApi {
        match self {
            ServiceKind::GitHub => &GitHub,
            ServiceKind::GitLab => &GitLab,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Quota observed on a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub remaining: u64,
    /// Absent when the kind does not report a per-endpoint limit.
    pub limit: Option<u64>,
    /// Unix timestamp (seconds) when the window resets.
    pub reset_epoch: u64,
}

/// One normalized page of a listing endpoint.
#[derive(Debug, Default)]
pub struct ListPage {
    /// Number of items the service returned, before filtering. Drives pagination.
    pub raw_count: usize,
    /// Records kept after normalization and filtering, in service order.
    pub repositories: Vec<Repository>,
    /// Records excluded by filtering, with the reason.
    pub skipped: Vec<(String, SkipReason)>,
    /// Items that could not be normalized (missing or mistyped keys).
    pub malformed: usize,
}

/// Per-kind capabilities used by the request orchestrator and discovery.
///
/// Implementations are zero-sized and stateless; everything configurable
/// lives on the `ServiceBinding`.
pub trait ForgeApi: Send + Sync {
    /// Kind this implementation serves.
    fn kind(&self) -> ServiceKind;

    /// Value for the `Accept` header on the shared session.
    fn accept(&self) -> &'static str;

    /// Authentication headers for one request with the given token.
    fn auth_headers(&self, token: &str) -> Result<HeaderMap>;

    /// Parse quota headers. Returns `None` unless every header this kind
    /// requires is present and numeric.
    fn parse_quota_headers(&self, headers: &HeaderMap, names: &RateLimitHeaders) -> Option<Quota>;

    /// Listing endpoint for an organization or group.
    fn list_url(&self, api_url: &str, org: &str) -> Result<Url>;

    /// Query parameters for one listing page (1-based).
    fn list_query(&self, page: u32) -> Vec<(&'static str, String)>;

    /// Normalize one listing page payload into repository records.
    fn parse_list_page(&self, org: &str, body: serde_json::Value) -> Result<ListPage>;

    /// Single-item commit history endpoint for a repository record.
    fn commit_url(&self, api_url: &str, repository: &Repository) -> Result<Url>;

    /// Identifier of the first commit in a commit history payload.
    fn extract_commit_id(&self, body: &serde_json::Value) -> Option<String>;
}

/// Query parameters for the single-item commit history endpoints.
pub fn commit_query() -> Vec<(&'static str, String)> {
    vec![("per_page", "1".to_string())]
}

/// Read a header as an unsigned integer, ignoring absent or unparseable values.
pub fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}

/// Join `segments` onto the path of `api_url`, percent-encoding each segment
/// (including any `/` inside it).
pub(crate) fn endpoint(api_url: &str, segments: &[&str]) -> Result<Url> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: api_url.to_string(),
        reason,
    };
    let mut url = Url::parse(api_url.trim_end_matches('/')).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("URL cannot be a base".into()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Split a JSON listing payload into its items.
pub(crate) fn page_items(body: serde_json::Value) -> Result<Vec<serde_json::Value>> {
    match body {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(Error::MalformedPayload(format!(
            "expected a JSON array of repositories, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn kind_dispatches_to_matching_api() {
        assert_eq!(ServiceKind::GitHub.api().kind(), ServiceKind::GitHub);
        assert_eq!(ServiceKind::GitLab.api().kind(), ServiceKind::GitLab);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ServiceKind::GitLab).unwrap(),
            "\"gitlab\""
        );
        let kind: ServiceKind = serde_json::from_str("\"github\"").unwrap();
        assert_eq!(kind, ServiceKind::GitHub);
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let url = endpoint("https://api.github.com/", &["orgs", "acme", "repos"]).unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/orgs/acme/repos");
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let url = endpoint("https://gitlab.com/api/v4", &["groups", "acme", "projects"]).unwrap();
        assert_eq!(url.as_str(), "https://gitlab.com/api/v4/groups/acme/projects");
    }

    #[test]
    fn endpoint_encodes_slashes_inside_segments() {
        let url = endpoint(
            "https://gitlab.com/api/v4",
            &["projects", "acme/infra/deploy", "repository", "commits"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.com/api/v4/projects/acme%2Finfra%2Fdeploy/repository/commits"
        );
    }

    #[test]
    fn endpoint_rejects_garbage_base() {
        assert!(matches!(
            endpoint("not a url", &["x"]),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn header_u64_parses_and_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4999"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000.5"));
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("lots"));
        assert_eq!(header_u64(&headers, "X-RateLimit-Remaining"), Some(4999));
        assert_eq!(header_u64(&headers, "X-RateLimit-Reset"), Some(1_700_000_000));
        assert_eq!(header_u64(&headers, "X-RateLimit-Limit"), None);
        assert_eq!(header_u64(&headers, "RateLimit-Remaining"), None);
    }

    #[test]
    fn page_items_rejects_objects() {
        let err = page_items(serde_json::json!({"message": "Not Found"})).unwrap_err();
        assert!(err.to_string().contains("got object"), "got: {err}");
        assert!(page_items(serde_json::Value::Null).unwrap().is_empty());
    }
}
