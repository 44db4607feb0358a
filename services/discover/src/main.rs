//! ghmon-discover
//!
//! Single-binary front end for repository discovery:
//! 1. Loads configuration (`--config` > `CONFIG_PATH` > `ghmon.toml`)
//! 2. Discovers repositories for every configured organization, bounded by
//!    `operation.api_concurrency`
//! 3. Looks up each repository's latest commit
//! 4. Prints one JSON object per repository on stdout
//!
//! Logs go to stderr as JSON.

use anyhow::{Context, Result};
use discovery::{Config, RepositoryIdentifier, RetryPolicy};
use forge::Repository;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One output line.
#[derive(Debug, Serialize)]
struct DiscoveredRepository<'a> {
    #[serde(flatten)]
    repository: &'a Repository,
    latest_commit: Option<String>,
}

/// Command-line flags.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<String>,
    skip_commits: bool,
}

impl Args {
    fn parse(args: &[String]) -> Self {
        Self {
            config: args
                .iter()
                .position(|a| a == "--config")
                .and_then(|i| args.get(i + 1))
                .cloned(),
            skip_commits: args.iter().any(|a| a == "--skip-commits"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("starting ghmon-discover");

    let args: Vec<String> = std::env::args().collect();
    let args = Args::parse(&args);

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        organizations = config.organizations.len(),
        repositories = config.repositories.len(),
        max_repos_per_org = config.operation.max_repos_per_org,
        api_concurrency = config.operation.api_concurrency,
        "configuration loaded"
    );

    let identifier = RepositoryIdentifier::from_config(&config, RetryPolicy::default())
        .context("failed to initialize hosting services")?;
    let concurrency = config.operation.api_concurrency;

    let mut repositories = Vec::new();
    let mut failed_orgs = 0;
    let mut results = stream::iter(config.organizations.iter())
        .map(|org| {
            let identifier = &identifier;
            async move { (org, identifier.identify_by_organization(org).await) }
        })
        .buffer_unordered(concurrency);
    while let Some((org, result)) = results.next().await {
        match result {
            Ok(found) => {
                info!(org = %org, count = found.len(), "organization discovered");
                repositories.extend(found);
            }
            Err(e) => {
                failed_orgs += 1;
                error!(org = %org, error = %e, "organization discovery failed");
            }
        }
    }
    drop(results);

    repositories.extend(identifier.identify_from_manual_list(&config.repositories));

    let lines: Vec<(&Repository, Option<String>)> = stream::iter(repositories.iter())
        .map(|repository| {
            let identifier = &identifier;
            let skip = args.skip_commits;
            async move {
                let commit = if skip {
                    None
                } else {
                    identifier.latest_commit(repository).await
                };
                (repository, commit)
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    for (repository, latest_commit) in lines {
        let line = serde_json::to_string(&DiscoveredRepository {
            repository,
            latest_commit,
        })
        .context("failed to serialize repository record")?;
        println!("{line}");
    }

    for (service, stats) in identifier.token_stats().await {
        let exhausted = stats.iter().filter(|s| !s.available).count();
        info!(
            service = %service,
            tokens = stats.len(),
            unavailable = exhausted,
            stats = %serde_json::to_string(&stats).unwrap_or_default(),
            "token pool state"
        );
    }

    info!(
        repositories = repositories.len(),
        failed_organizations = failed_orgs,
        "discovery complete"
    );

    if !config.organizations.is_empty() && failed_orgs == config.organizations.len() {
        warn!("every organization failed");
        anyhow::bail!("discovery failed for all {failed_orgs} organizations");
    }

    Ok(())
}
