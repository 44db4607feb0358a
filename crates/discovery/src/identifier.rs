//! Repository discovery and commit lookup across configured services

use forge::{PAGE_SIZE, Repository, ServiceBinding, ServiceKind, commit_query};
use token_pool::TokenStats;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::manual::{ManualRepository, parse_repository_url};
use crate::metrics;
use crate::request::{RetryPolicy, Service};

/// Organization suffixes that route to a GitLab binding when nothing else matches.
const GITLAB_SUFFIXES: [&str; 2] = ["-gitlab", "-gl"];

/// Identifies repositories across every configured service.
pub struct RepositoryIdentifier {
    services: Vec<Service>,
    /// `None` means unlimited.
    max_repos: Option<usize>,
}

impl RepositoryIdentifier {
    pub fn new(services: Vec<Service>, max_repos: Option<usize>) -> Self {
        if services.is_empty() {
            warn!("no hosting services were initialized, repository identification will fail");
        }
        Self {
            services,
            max_repos,
        }
    }

    /// Build one `Service` per enabled, credentialed entry in `config`.
    pub fn from_config(config: &Config, policy: RetryPolicy) -> Result<Self> {
        let mut services = Vec::new();
        for definition in config.service_definitions() {
            let binding = ServiceBinding::new(definition.settings);
            info!(
                service = %binding.name,
                kind = %binding.kind,
                api_url = %binding.api_url,
                tokens = definition.tokens.len(),
                "initialized service"
            );
            services.push(Service::new(binding, definition.tokens, policy.clone())?);
        }
        Ok(Self::new(services, config.max_repos()))
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Pick the service for `org` and the organization name to send to it.
    ///
    /// Order: explicit mapping, `service:org` prefix, `-gitlab`/`-gl` suffix
    /// (first GitLab binding), then the first GitHub binding.
    pub fn resolve_service<'a>(&'a self, org: &'a str) -> Result<(&'a Service, &'a str)> {
        if let Some(service) = self.services.iter().find(|s| s.binding().maps_org(org)) {
            debug!(org, service = service.name(), "explicit organization mapping");
            return Ok((service, org));
        }

        if let Some((name, bare)) = org.split_once(':')
            && let Some(service) = self.services.iter().find(|s| s.name() == name)
        {
            debug!(org, service = service.name(), "service:org mapping");
            return Ok((service, bare));
        }

        let lower = org.to_ascii_lowercase();
        if GITLAB_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
            && let Some(service) = self.services.iter().find(|s| s.binding().kind == ServiceKind::GitLab)
        {
            debug!(org, service = service.name(), "GitLab chosen by organization name");
            return Ok((service, org));
        }

        if let Some(service) = self.services.iter().find(|s| s.binding().kind == ServiceKind::GitHub) {
            debug!(org, service = service.name(), "defaulting to GitHub");
            return Ok((service, org));
        }

        warn!(org, "no suitable service found for organization");
        Err(Error::NoSuitableService(org.to_string()))
    }

    /// Discover every repository of `org`, newest first on GitHub.
    ///
    /// Records keep `org` exactly as given in `organization`, so a later
    /// `latest_commit` resolves to the same service. Any failure is wrapped in
    /// `Error::Discovery` naming the organization.
    pub async fn identify_by_organization(&self, org: &str) -> Result<Vec<Repository>> {
        let (service, bare) = self.resolve_service(org).map_err(|e| e.in_org(org))?;
        self.paginate(service, org, bare)
            .await
            .map_err(|e| e.in_org(org))
    }

    async fn paginate(&self, service: &Service, org: &str, bare: &str) -> Result<Vec<Repository>> {
        let binding = service.binding();
        let api = binding.kind.api();
        let url = api.list_url(&binding.api_url, bare)?;

        info!(org, service = %binding.name, max_repos = ?self.max_repos, "discovering repositories");

        let mut repos = Vec::new();
        let mut page_number = 1;
        let mut fetched = 0;
        'pages: loop {
            debug!(org, page = page_number, "fetching page");
            let body = service.get_json(url.clone(), &api.list_query(page_number)).await?;
            let page = api.parse_list_page(bare, body)?;
            if page.raw_count == 0 {
                break;
            }
            fetched += page.raw_count;
            info!(org, page = page_number, count = page.raw_count, total = fetched, "fetched page");

            for (_, reason) in &page.skipped {
                metrics::record_skipped(&binding.name, *reason);
            }
            for mut repo in page.repositories {
                repo.organization = org.to_string();
                repos.push(repo);
                if self.max_repos.is_some_and(|max| repos.len() >= max) {
                    info!(org, limit = repos.len(), "reached repository limit, stopping discovery");
                    break 'pages;
                }
            }

            if page.raw_count < PAGE_SIZE as usize {
                break;
            }
            page_number += 1;
        }

        metrics::record_discovered(&binding.name, repos.len());
        info!(org, service = %binding.name, count = repos.len(), "discovered repositories");
        Ok(repos)
    }

    /// Latest commit id of `repository`, or `None` on any failure.
    ///
    /// The service is resolved again from `repository.organization`.
    pub async fn latest_commit(&self, repository: &Repository) -> Option<String> {
        match self.fetch_latest_commit(repository).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                warn!(repository = %repository.full_name, "no commits found");
                None
            }
            Err(e) => {
                error!(repository = %repository.full_name, error = %e, "failed to get latest commit");
                None
            }
        }
    }

    async fn fetch_latest_commit(&self, repository: &Repository) -> Result<Option<String>> {
        let (service, _) = self.resolve_service(&repository.organization)?;
        let binding = service.binding();
        if binding.kind != repository.platform {
            warn!(
                repository = %repository.full_name,
                platform = %repository.platform,
                service = %binding.name,
                "organization resolves to a service of another platform"
            );
            return Err(Error::NoSuitableService(repository.organization.clone()));
        }
        let api = binding.kind.api();
        let url = api.commit_url(&binding.api_url, repository)?;
        let body = service.get_json(url, &commit_query()).await?;
        Ok(api.extract_commit_id(&body))
    }

    /// Records for a hand-written list of repository URLs.
    ///
    /// Unparseable or unrecognized URLs are logged and skipped.
    pub fn identify_from_manual_list<S: AsRef<str>>(&self, urls: &[S]) -> Vec<Repository> {
        let bindings: Vec<&ServiceBinding> = self.services.iter().map(|s| s.binding()).collect();
        urls.iter()
            .filter_map(|url| parse_repository_url(url.as_ref(), &bindings))
            .map(|parsed| self.pin_to_host(parsed))
            .collect()
    }

    /// Prefix the organization with `service:` when plain resolution would
    /// route it away from the binding whose host the URL named.
    fn pin_to_host(&self, parsed: ManualRepository<'_>) -> Repository {
        let ManualRepository {
            mut repository,
            binding,
        } = parsed;
        let Some(binding) = binding else {
            return repository;
        };
        let routed_here = self
            .resolve_service(&repository.organization)
            .is_ok_and(|(service, _)| service.name() == binding.name);
        if !routed_here {
            repository.organization = format!("{}:{}", binding.name, repository.organization);
        }
        repository
    }

    /// Domain-based discovery is not implemented; always returns no records.
    pub fn identify_by_domain(&self, domain: &str) -> Vec<Repository> {
        warn!(domain, "domain-based identification is not implemented");
        Vec::new()
    }

    /// Per-service token snapshots, keyed by service name.
    pub async fn token_stats(&self) -> Vec<(String, Vec<TokenStats>)> {
        let mut stats = Vec::with_capacity(self.services.len());
        for service in &self.services {
            stats.push((service.name().to_string(), service.pool().stats().await));
        }
        stats
    }
}
