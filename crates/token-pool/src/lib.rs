//! Rate-limit aware credential pool for one hosting service
//!
//! Holds every API token configured for a service together with its liveness
//! state. Concurrent callers share one pool per service:
//!
//! 1. `acquire` hands out the eligible token with the most remaining quota,
//!    least recently used first, and stamps it as used.
//! 2. Successful responses feed `update_quota`; a token under 10% of its limit
//!    is parked until no better token is left.
//! 3. Rate-limited responses call `mark_rate_limited` with the service's reset
//!    deadline.
//! 4. When nothing is eligible, `acquire` reinstates tokens whose deadline has
//!    passed, or sleeps (lock released) until the soonest deadline.

pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use pool::{MAX_RESET_HORIZON, RESET_BUFFER, SelectedToken, TokenPool, TokenStats, reset_instant};
