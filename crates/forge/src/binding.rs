//! Immutable per-service configuration
//!
//! A `ServiceBinding` is built once at startup from `BindingSettings`. Rate
//! limit header names are resolved against the kind defaults here, so the
//! request path never recomputes them.

use crate::ServiceKind;

/// Response header names carrying quota information for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub remaining: Option<String>,
    pub limit: Option<String>,
    pub reset: Option<String>,
}

impl RateLimitHeaders {
    /// Conventional header names for a service kind.
    ///
    /// GitLab reports quota per account rather than per endpoint, so only the
    /// remaining/reset pair is assumed.
    pub fn defaults_for(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::GitHub => Self {
                remaining: Some("X-RateLimit-Remaining".into()),
                limit: Some("X-RateLimit-Limit".into()),
                reset: Some("X-RateLimit-Reset".into()),
            },
            ServiceKind::GitLab => Self {
                remaining: Some("RateLimit-Remaining".into()),
                limit: None,
                reset: Some("RateLimit-Reset".into()),
            },
        }
    }
}

/// Inputs for building a binding. Unset header names fall back to the kind defaults.
#[derive(Debug, Clone)]
pub struct BindingSettings {
    pub name: String,
    pub kind: ServiceKind,
    pub api_url: String,
    pub clone_url_base: String,
    /// Organizations explicitly routed to this service.
    pub organizations: Vec<String>,
    pub rate_limit_header_remaining: Option<String>,
    pub rate_limit_header_limit: Option<String>,
    pub rate_limit_header_reset: Option<String>,
}

impl BindingSettings {
    /// Settings for the public instance of a kind with default URLs.
    pub fn public(kind: ServiceKind) -> Self {
        let (api_url, clone_url_base) = match kind {
            ServiceKind::GitHub => ("https://api.github.com", "https://github.com"),
            ServiceKind::GitLab => ("https://gitlab.com/api/v4", "https://gitlab.com"),
        };
        Self {
            name: kind.label().to_string(),
            kind,
            api_url: api_url.to_string(),
            clone_url_base: clone_url_base.to_string(),
            organizations: Vec::new(),
            rate_limit_header_remaining: None,
            rate_limit_header_limit: None,
            rate_limit_header_reset: None,
        }
    }
}

/// Static configuration for one hosting service.
#[derive(Debug, Clone)]
pub struct ServiceBinding {
    pub name: String,
    pub kind: ServiceKind,
    pub api_url: String,
    pub clone_url_base: String,
    pub organizations: Vec<String>,
    pub headers: RateLimitHeaders,
}

impl ServiceBinding {
    pub fn new(settings: BindingSettings) -> Self {
        let defaults = RateLimitHeaders::defaults_for(settings.kind);
        let headers = RateLimitHeaders {
            remaining: settings.rate_limit_header_remaining.or(defaults.remaining),
            limit: settings.rate_limit_header_limit.or(defaults.limit),
            reset: settings.rate_limit_header_reset.or(defaults.reset),
        };
        Self {
            name: settings.name,
            kind: settings.kind,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            clone_url_base: settings.clone_url_base.trim_end_matches('/').to_string(),
            organizations: settings.organizations,
            headers,
        }
    }

    /// Whether `org` is explicitly mapped to this service.
    pub fn maps_org(&self, org: &str) -> bool {
        self.organizations.iter().any(|o| o == org)
    }

    /// Host part of `clone_url_base`, lowercased (e.g. `github.com`).
    pub fn clone_host(&self) -> Option<String> {
        reqwest::Url::parse(&self.clone_url_base)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}
