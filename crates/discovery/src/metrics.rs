//! Discovery counters
//!
//! - `forge_requests_total` (counter): labels `service`, `outcome`
//! - `forge_rate_limited_total` (counter): label `service`
//! - `discovery_repositories_total` (counter): label `service`
//! - `discovery_repositories_skipped_total` (counter): labels `service`, `reason`
//!
//! No recorder is installed here; without one every call is a no-op.

use forge::SkipReason;

/// Result of one HTTP attempt, used as the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    HttpError,
    TransportError,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::RateLimited => "rate_limited",
            Outcome::HttpError => "http_error",
            Outcome::TransportError => "transport_error",
        }
    }
}

/// Record one HTTP attempt against a service.
pub fn record_request(service: &str, outcome: Outcome) {
    metrics::counter!(
        "forge_requests_total",
        "service" => service.to_string(),
        "outcome" => outcome.label()
    )
    .increment(1);
    if outcome == Outcome::RateLimited {
        metrics::counter!("forge_rate_limited_total", "service" => service.to_string())
            .increment(1);
    }
}

/// Record repositories kept by discovery.
pub fn record_discovered(service: &str, count: usize) {
    metrics::counter!("discovery_repositories_total", "service" => service.to_string())
        .increment(count as u64);
}

/// Record one repository excluded by filtering.
pub fn record_skipped(service: &str, reason: SkipReason) {
    metrics::counter!(
        "discovery_repositories_skipped_total",
        "service" => service.to_string(),
        "reason" => reason.label()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("github", Outcome::Success);
        record_request("gitlab", Outcome::RateLimited);
        record_discovered("github", 3);
        record_skipped("github", SkipReason::Archived);
    }

    #[test]
    fn outcome_labels_are_snake_case() {
        assert_eq!(Outcome::RateLimited.label(), "rate_limited");
        assert_eq!(Outcome::TransportError.label(), "transport_error");
    }
}
