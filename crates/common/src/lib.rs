//! Types shared across the ghmon discovery workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
