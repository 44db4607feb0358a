//! Response classification for hosting-service APIs
//!
//! GitHub signals primary and secondary rate limits with 403 and a message
//! mentioning the rate limit; GitLab throttles with 429. Everything else that
//! is not a success is a plain failure.

/// How the request orchestrator should treat a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// Mark the credential rate limited and retry with another.
    RateLimited,
    /// Non-rate-limit error status.
    Failed,
}

/// Message fragments that mark a 403 as a rate limit rather than a permission error.
const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "ratelimit"];

/// Classify a response by HTTP status and body text.
pub fn classify_response(status: u16, body: &str) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        429 => ResponseClass::RateLimited,
        403 if mentions_rate_limit(body) => ResponseClass::RateLimited,
        _ => ResponseClass::Failed,
    }
}

fn mentions_rate_limit(body: &str) -> bool {
    let lower = body.to_lowercase();
    RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p))
}
