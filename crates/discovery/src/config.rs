//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens may come from `GITHUB_TOKENS` / `GITLAB_TOKENS` (comma-separated),
//! which replace whatever the `[github]` / `[gitlab]` tables carry, so
//! secrets need not live in the TOML.

use common::Secret;
use forge::{BindingSettings, ServiceKind};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config file name when neither `--config` nor `CONFIG_PATH` is given.
pub const DEFAULT_CONFIG_PATH: &str = "ghmon.toml";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Organizations or groups to discover, optionally as `service:org`.
    #[serde(default)]
    pub organizations: Vec<String>,
    /// Individual repository URLs to include alongside discovered ones.
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub operation: OperationConfig,
    #[serde(default)]
    pub github: Option<ServiceConfig>,
    #[serde(default)]
    pub gitlab: Option<ServiceConfig>,
    /// Additional self-hosted instances.
    #[serde(default)]
    pub services: Vec<InstanceConfig>,
}

/// Discovery limits
#[derive(Debug, Deserialize)]
pub struct OperationConfig {
    /// 0 means unlimited.
    #[serde(default = "default_max_repos_per_org")]
    pub max_repos_per_org: usize,
    #[serde(default = "default_api_concurrency")]
    pub api_concurrency: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            max_repos_per_org: default_max_repos_per_org(),
            api_concurrency: default_api_concurrency(),
        }
    }
}

fn default_max_repos_per_org() -> usize {
    1000
}

fn default_api_concurrency() -> usize {
    10
}

/// A single token string or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TokenList {
    One(String),
    Many(Vec<String>),
}

impl TokenList {
    fn into_vec(self) -> Vec<String> {
        match self {
            TokenList::One(t) => vec![t],
            TokenList::Many(ts) => ts,
        }
    }
}

/// Settings shared by the `[github]`/`[gitlab]` tables and `[[services]]` entries.
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    /// Public tables default to disabled; `[[services]]` entries to enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    tokens: Option<TokenList>,
    /// Legacy single-token field, used only when `tokens` yields nothing.
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub clone_url_base: Option<String>,
    /// Organizations explicitly routed to this service.
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub rate_limit_header_remaining: Option<String>,
    #[serde(default)]
    pub rate_limit_header_limit: Option<String>,
    #[serde(default)]
    pub rate_limit_header_reset: Option<String>,
    /// Resolved credentials. Raw `tokens`/`token` are cleared once these are set.
    #[serde(skip)]
    pub credentials: Vec<Secret<String>>,
}

impl ServiceConfig {
    fn empty() -> Self {
        Self {
            enabled: None,
            tokens: None,
            token: None,
            api_url: None,
            clone_url_base: None,
            organizations: Vec::new(),
            rate_limit_header_remaining: None,
            rate_limit_header_limit: None,
            rate_limit_header_reset: None,
            credentials: Vec::new(),
        }
    }

    /// Move raw token fields into `credentials`, preferring `env_tokens` when set.
    fn resolve_credentials(&mut self, label: &str, env_tokens: Option<Vec<String>>) {
        let file_tokens = self.tokens.take().map(TokenList::into_vec).unwrap_or_default();
        let legacy = self.token.take();

        let tokens = match env_tokens {
            Some(tokens) => tokens,
            None => {
                let mut tokens = clean_tokens(file_tokens);
                if tokens.is_empty()
                    && let Some(legacy) = legacy
                {
                    tokens = clean_tokens(vec![legacy]);
                    if !tokens.is_empty() {
                        info!(
                            service = label,
                            "using legacy single `token` field, consider switching to `tokens`"
                        );
                    }
                }
                tokens
            }
        };
        self.credentials = tokens.into_iter().map(Secret::new).collect();
    }

    fn validate(&self, label: &str) -> common::Result<()> {
        for (field, value) in [
            ("api_url", &self.api_url),
            ("clone_url_base", &self.clone_url_base),
        ] {
            if let Some(url) = value
                && !url.starts_with("http://")
                && !url.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "{label}.{field} must start with http:// or https://, got: {url}"
                )));
            }
        }
        Ok(())
    }

    fn settings(&self, name: &str, kind: ServiceKind) -> BindingSettings {
        let mut settings = BindingSettings::public(kind);
        settings.name = name.to_string();
        if let Some(api_url) = &self.api_url {
            settings.api_url = api_url.clone();
        }
        if let Some(base) = &self.clone_url_base {
            settings.clone_url_base = base.clone();
        }
        settings.organizations = self.organizations.clone();
        settings.rate_limit_header_remaining = self.rate_limit_header_remaining.clone();
        settings.rate_limit_header_limit = self.rate_limit_header_limit.clone();
        settings.rate_limit_header_reset = self.rate_limit_header_reset.clone();
        settings
    }
}

/// A self-hosted instance from `[[services]]`.
#[derive(Debug, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    #[serde(flatten)]
    pub service: ServiceConfig,
}

/// One service ready to be bound: its settings and credentials.
#[derive(Debug)]
pub struct ServiceDefinition {
    pub settings: BindingSettings,
    pub tokens: Vec<Secret<String>>,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from TOML text, then overlay environment variables.
    pub fn parse(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        for (kind, env_var) in [
            (ServiceKind::GitHub, "GITHUB_TOKENS"),
            (ServiceKind::GitLab, "GITLAB_TOKENS"),
        ] {
            let env_tokens = env_token_list(env_var);
            let section = match kind {
                ServiceKind::GitHub => &mut config.github,
                ServiceKind::GitLab => &mut config.gitlab,
            };
            // Tokens in the environment enable a service the file does not mention.
            if section.is_none() && env_tokens.is_some() {
                let mut implied = ServiceConfig::empty();
                implied.enabled = Some(true);
                *section = Some(implied);
            }
            if let Some(section) = section {
                section.validate(kind.label())?;
                section.resolve_credentials(kind.label(), env_tokens);
            }
        }

        let mut names: HashSet<String> = [ServiceKind::GitHub, ServiceKind::GitLab]
            .iter()
            .map(|k| k.label().to_string())
            .collect();
        for instance in &mut config.services {
            if instance.name.trim().is_empty() {
                return Err(common::Error::Config(
                    "services entries must have a non-empty name".into(),
                ));
            }
            if !names.insert(instance.name.clone()) {
                return Err(common::Error::Config(format!(
                    "duplicate service name: {}",
                    instance.name
                )));
            }
            let label = format!("services.{}", instance.name);
            if instance.service.api_url.is_none() {
                return Err(common::Error::Config(format!("{label}.api_url is required")));
            }
            if instance.service.clone_url_base.is_none() {
                return Err(common::Error::Config(format!(
                    "{label}.clone_url_base is required"
                )));
            }
            instance.service.validate(&label)?;
            instance.service.resolve_credentials(&instance.name, None);
        }

        if config.operation.api_concurrency == 0 {
            return Err(common::Error::Config(
                "operation.api_concurrency must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Repository cap per organization, `None` when unlimited.
    pub fn max_repos(&self) -> Option<usize> {
        match self.operation.max_repos_per_org {
            0 => None,
            n => Some(n),
        }
    }

    /// Enabled services that have at least one credential, public tables first.
    ///
    /// Enabled services without credentials are skipped with a warning.
    pub fn service_definitions(&self) -> Vec<ServiceDefinition> {
        let public = [
            (ServiceKind::GitHub, &self.github),
            (ServiceKind::GitLab, &self.gitlab),
        ]
        .into_iter()
        .filter_map(|(kind, section)| {
            section
                .as_ref()
                .map(|s| (kind.label().to_string(), kind, s, s.enabled.unwrap_or(false)))
        });
        let instances = self.services.iter().map(|i| {
            (
                i.name.clone(),
                i.kind,
                &i.service,
                i.service.enabled.unwrap_or(true),
            )
        });

        let mut definitions = Vec::new();
        for (name, kind, section, enabled) in public.chain(instances) {
            if !enabled {
                info!(service = %name, "service is not enabled");
                continue;
            }
            if section.credentials.is_empty() {
                warn!(service = %name, "service is enabled but no tokens are configured");
                continue;
            }
            definitions.push(ServiceDefinition {
                settings: section.settings(&name, kind),
                tokens: section.credentials.clone(),
            });
        }
        definitions
    }
}

fn env_token_list(var: &str) -> Option<Vec<String>> {
    let raw = std::env::var(var).ok()?;
    let tokens = clean_tokens(raw.split(',').map(str::to_string).collect());
    (!tokens.is_empty()).then_some(tokens)
}

fn clean_tokens(tokens: Vec<String>) -> Vec<String> {
    tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
