//! Error types for request building and payload parsing

/// Errors from forge request construction and response normalization.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The token cannot be sent as a header value.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

/// Result alias for forge operations.
pub type Result<T> = std::result::Result<T, Error>;
