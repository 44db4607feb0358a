//! Repository discovery across GitHub and GitLab services
//!
//! `RepositoryIdentifier` resolves an organization to one configured
//! `Service`, pages through its listing endpoint and normalizes the results.
//! Every HTTP call goes through `Service::execute`, which draws credentials
//! from the service's `TokenPool` and retries rate limits with backoff.

pub mod config;
pub mod error;
pub mod identifier;
pub mod manual;
pub mod metrics;
pub mod request;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{Error, RequestCause, Result};
pub use identifier::RepositoryIdentifier;
pub use request::{ApiResponse, RetryPolicy, Service};
