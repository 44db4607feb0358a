//! Request orchestration against one service
//!
//! Every call acquires a credential from the service's pool, attaches the
//! kind's auth headers, feeds observed quota back into the pool and retries
//! rate limits, transport failures and error statuses with exponential
//! backoff.

use std::time::Duration;

use common::Secret;
use forge::{RateLimitHeaders, ResponseClass, ServiceBinding, USER_AGENT, classify_response, header_u64};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use token_pool::{TokenPool, reset_instant};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, RequestCause, Result};
use crate::metrics::{self, Outcome};

/// Assumed wait when a rate-limited response carries no usable reset header.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Longest response body kept in a `RequestCause::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Attempts, backoff base and per-request timeout.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry `n` (0-based) is `base_delay * 2^n`.
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Successful response with its body already read.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Outcome of a single attempt.
enum Attempt {
    Done(ApiResponse),
    RateLimited,
    Failed(RequestCause),
}

/// A service binding with its HTTP session and token pool.
pub struct Service {
    binding: ServiceBinding,
    client: reqwest::Client,
    pool: TokenPool,
    policy: RetryPolicy,
}

impl Service {
    pub fn new(binding: ServiceBinding, tokens: Vec<Secret<String>>, policy: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(binding.kind.api().accept()));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::Client)?;
        let pool = TokenPool::new(
            binding.name.clone(),
            tokens.iter().map(|t| t.expose().clone()).collect(),
        );
        Ok(Self {
            binding,
            client,
            pool,
            policy,
        })
    }

    pub fn binding(&self) -> &ServiceBinding {
        &self.binding
    }

    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    pub fn name(&self) -> &str {
        &self.binding.name
    }

    /// Execute one logical call, retrying per the service's `RetryPolicy`.
    ///
    /// Fails with `RateLimited` when no credential can be acquired or the final
    /// attempt is rate limited, and with `RequestFailed` when the final attempt
    /// fails for any other reason.
    pub async fn execute(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<ApiResponse> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let last = attempt + 1 >= attempts;
            let cause = match self.attempt(&method, &url, query).await? {
                Attempt::Done(response) => return Ok(response),
                Attempt::RateLimited if last => {
                    return Err(Error::RateLimited(format!(
                        "{} rate limit exceeded after {attempts} attempts",
                        self.binding.name
                    )));
                }
                Attempt::RateLimited => "rate limited".to_string(),
                Attempt::Failed(cause) if last => {
                    return Err(Error::RequestFailed {
                        method,
                        url: url.to_string(),
                        cause,
                    });
                }
                Attempt::Failed(cause) => cause.to_string(),
            };

            let delay = self.policy.backoff(attempt);
            warn!(
                service = %self.binding.name,
                %url,
                attempt = attempt + 1,
                retry_in_ms = delay.as_millis() as u64,
                error = %cause,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json(&self, url: Url, query: &[(&str, String)]) -> Result<serde_json::Value> {
        let response = self.execute(Method::GET, url.clone(), query).await?;
        serde_json::from_str(&response.body).map_err(|e| Error::RequestFailed {
            method: Method::GET,
            url: url.to_string(),
            cause: RequestCause::Decode(e),
        })
    }

    async fn attempt(&self, method: &Method, url: &Url, query: &[(&str, String)]) -> Result<Attempt> {
        let selected = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::RateLimited(e.to_string()))?;
        let auth = self.binding.kind.api().auth_headers(selected.token.expose())?;

        let sent = self
            .client
            .request(method.clone(), url.clone())
            .headers(auth)
            .query(query)
            .timeout(self.policy.timeout)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                metrics::record_request(&self.binding.name, Outcome::TransportError);
                return Ok(Attempt::Failed(RequestCause::Transport(e)));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        self.record_quota(selected.id, &headers).await;

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                metrics::record_request(&self.binding.name, Outcome::TransportError);
                return Ok(Attempt::Failed(RequestCause::Transport(e)));
            }
        };

        match classify_response(status.as_u16(), &body) {
            ResponseClass::Success => {
                metrics::record_request(&self.binding.name, Outcome::Success);
                debug!(service = %self.binding.name, %url, status = status.as_u16(), "request succeeded");
                Ok(Attempt::Done(ApiResponse {
                    status,
                    headers,
                    body,
                }))
            }
            ResponseClass::RateLimited => {
                metrics::record_request(&self.binding.name, Outcome::RateLimited);
                let reset_at = self
                    .binding
                    .headers
                    .reset
                    .as_deref()
                    .and_then(|name| header_u64(&headers, name))
                    .and_then(reset_instant)
                    .unwrap_or_else(|| Instant::now() + DEFAULT_RATE_LIMIT_WAIT);
                warn!(
                    service = %self.binding.name,
                    token = %selected.token.masked(),
                    reset_in_secs = reset_at.saturating_duration_since(Instant::now()).as_secs(),
                    "rate limit hit"
                );
                self.pool.mark_rate_limited(selected.id, reset_at, 0, 0).await;
                Ok(Attempt::RateLimited)
            }
            ResponseClass::Failed => {
                metrics::record_request(&self.binding.name, Outcome::HttpError);
                Ok(Attempt::Failed(RequestCause::Status {
                    status,
                    body: truncate(body),
                }))
            }
        }
    }

    /// Feed quota headers back into the pool. Missing or unparseable headers are ignored.
    async fn record_quota(&self, token_id: usize, headers: &HeaderMap) {
        let api = self.binding.kind.api();
        match api.parse_quota_headers(headers, &self.binding.headers) {
            Some(quota) => {
                self.pool
                    .update_quota(token_id, quota.remaining, quota.limit)
                    .await
            }
            None if any_quota_header(headers, &self.binding.headers) => warn!(
                service = %self.binding.name,
                "quota headers present but incomplete or non-numeric, ignoring"
            ),
            None => debug!(service = %self.binding.name, "no quota headers on response"),
        }
    }
}

/// Whether any configured quota header appears on the response at all.
fn any_quota_header(headers: &HeaderMap, names: &RateLimitHeaders) -> bool {
    [&names.remaining, &names.limit, &names.reset]
        .into_iter()
        .flatten()
        .any(|name| headers.contains_key(name.as_str()))
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}
