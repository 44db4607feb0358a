//! Discovery error taxonomy

use reqwest::{Method, StatusCode};

/// Errors surfaced by the request orchestrator and repository discovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No enabled service binding matches the organization.
    #[error("no suitable service found for organization: {0}")]
    NoSuitableService(String),

    /// Every credential is exhausted, or rate limiting persisted through all attempts.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport failure or non-success status that retries did not recover.
    #[error("{method} {url} failed: {cause}")]
    RequestFailed {
        method: Method,
        url: String,
        #[source]
        cause: RequestCause,
    },

    /// Any failure while discovering one organization, with that organization attached.
    #[error("failed to identify repositories for {org}: {source}")]
    Discovery {
        org: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Forge(#[from] forge::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Underlying reason for a `RequestFailed`.
#[derive(Debug, thiserror::Error)]
pub enum RequestCause {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid JSON body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result alias for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap `self` with the organization being discovered.
    pub fn in_org(self, org: &str) -> Self {
        match self {
            Error::Discovery { .. } => self,
            other => Error::Discovery {
                org: org.to_string(),
                source: Box::new(other),
            },
        }
    }
}
