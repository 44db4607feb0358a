//! Repository records from hand-written clone/browse URLs

use forge::{Repository, ServiceBinding, ServiceKind};
use reqwest::Url;
use tracing::warn;

/// A record parsed from a URL, with the binding whose clone host matched.
#[derive(Debug)]
pub struct ManualRepository<'b> {
    pub repository: Repository,
    /// `None` when the host was only recognized as public github.com/gitlab.com.
    pub binding: Option<&'b ServiceBinding>,
}

/// Parse one repository URL such as `https://github.com/acme/widgets(.git)`.
///
/// The platform comes from the first binding whose clone host matches the URL
/// host, else from a `github.com`/`gitlab.com` host. Everything before the last
/// path segment becomes the organization, so nested GitLab groups survive.
pub fn parse_repository_url<'b>(
    raw: &str,
    bindings: &[&'b ServiceBinding],
) -> Option<ManualRepository<'b>> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(e) => {
            warn!(url = raw, error = %e, "failed to parse repository URL");
            return None;
        }
    };
    let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
        warn!(url = raw, "repository URL has no host");
        return None;
    };

    let binding = bindings
        .iter()
        .copied()
        .find(|b| b.clone_host().as_deref() == Some(host.as_str()));
    let Some(platform) = binding.map(|b| b.kind).or_else(|| public_platform(&host)) else {
        warn!(url = raw, host = %host, "repository URL does not belong to a known service");
        return None;
    };

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let [owner @ .., last] = segments.as_slice() else {
        warn!(url = raw, "repository URL has no path");
        return None;
    };
    if owner.is_empty() {
        warn!(url = raw, "repository URL must name an owner and a repository");
        return None;
    }
    let name = last.strip_suffix(".git").unwrap_or(*last);
    let organization = owner.join("/");

    let clone_url = if trimmed.ends_with(".git") {
        trimmed.to_string()
    } else {
        format!("{trimmed}.git")
    };
    let html_url = trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string();

    Some(ManualRepository {
        repository: Repository::minimal(platform, &organization, name, clone_url, html_url),
        binding,
    })
}

fn public_platform(host: &str) -> Option<ServiceKind> {
    if host == "github.com" || host.ends_with(".github.com") {
        Some(ServiceKind::GitHub)
    } else if host == "gitlab.com" || host.ends_with(".gitlab.com") {
        Some(ServiceKind::GitLab)
    } else {
        None
    }
}
