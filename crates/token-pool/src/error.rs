//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No token is eligible now and none will become eligible by waiting.
    #[error("token pool for {service} exhausted ({rate_limited} of {total} tokens unavailable)")]
    Exhausted {
        service: String,
        total: usize,
        rate_limited: usize,
    },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
