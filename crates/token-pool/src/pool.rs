//! Token selection, quota bookkeeping and rate-limit recovery
//!
//! All state lives behind one `tokio::sync::Mutex`, so `acquire`,
//! `mark_rate_limited`, `update_quota` and `stats` are mutually exclusive.
//! `acquire` drops the lock before sleeping on a reset deadline.
//!
//! `reset_at` does double duty: while a token is rate limited it is the reset
//! deadline; otherwise it is the last time the token was handed out, which
//! drives least-recently-used tie-breaking.

use std::cmp::Reverse;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Added to the soonest reset deadline before waking, to absorb clock skew
/// between us and the service.
pub const RESET_BUFFER: Duration = Duration::from_secs(2);

/// Reset timestamps further out than this are treated as unusable.
pub const MAX_RESET_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Liveness state of one token. Only touched under the pool lock.
#[derive(Debug)]
struct TokenState {
    secret: Secret<String>,
    available: bool,
    reset_at: Option<Instant>,
    remaining: Option<u64>,
    limit: Option<u64>,
}

impl TokenState {
    fn new(secret: String) -> Self {
        Self {
            secret: Secret::new(secret),
            available: true,
            reset_at: None,
            remaining: None,
            limit: None,
        }
    }

    fn eligible(&self, now: Instant) -> bool {
        self.available && self.reset_at.is_none_or(|at| at <= now)
    }
}

/// A token handed out by `acquire`. `id` identifies it in later pool calls.
#[derive(Debug, Clone)]
pub struct SelectedToken {
    pub id: usize,
    pub token: Secret<String>,
}

/// Read-only snapshot of one token for observability. Never carries the full secret.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenStats {
    pub id: usize,
    /// First characters of the token followed by `...`
    pub token: String,
    pub available: bool,
    /// Seconds until the reset deadline, when it lies in the future.
    pub reset_in_secs: Option<u64>,
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
}

/// Thread-safe pool of API tokens for one service.
pub struct TokenPool {
    service: String,
    tokens: Mutex<Vec<TokenState>>,
    reset_buffer: Duration,
}

impl TokenPool {
    /// Create a pool for `service`. Every token starts available with unknown quota.
    pub fn new(service: impl Into<String>, tokens: Vec<String>) -> Self {
        let service = service.into();
        info!(service = %service, tokens = tokens.len(), "token pool initialized");
        Self {
            service,
            tokens: Mutex::new(tokens.into_iter().map(TokenState::new).collect()),
            reset_buffer: RESET_BUFFER,
        }
    }

    /// Override the wake-up buffer added to reset deadlines.
    pub fn with_reset_buffer(mut self, buffer: Duration) -> Self {
        self.reset_buffer = buffer;
        self
    }

    /// Service name this pool belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Select the best eligible token, waiting for a reset if necessary.
    ///
    /// Eligible tokens are available and have no future reset deadline. Among
    /// them the highest known `remaining` wins (unknown counts as 0), then the
    /// least recently selected. When none is eligible, tokens whose deadline
    /// has passed are reinstated; failing that the call sleeps until the
    /// soonest deadline plus the buffer and tries exactly once more.
    ///
    /// Returns `Exhausted` if no token is or will become eligible.
    pub async fn acquire(&self) -> Result<SelectedToken> {
        let wake_at = {
            let mut tokens = self.tokens.lock().await;
            let now = Instant::now();

            if let Some(selected) = select_best(&mut tokens, now) {
                debug!(service = %self.service, token_id = selected.id, "token selected");
                return Ok(selected);
            }

            let recovered = reinstate_elapsed(&mut tokens, now);
            if recovered > 0 {
                info!(service = %self.service, recovered, "recovered tokens with expired reset times");
                if let Some(selected) = select_best(&mut tokens, now) {
                    return Ok(selected);
                }
            }

            match soonest_reset(&tokens, now) {
                Some(at) => at.checked_add(self.reset_buffer).unwrap_or(at),
                None => {
                    metrics::counter!("token_pool_exhausted_total", "service" => self.service.clone())
                        .increment(1);
                    return Err(self.exhausted(&tokens, now));
                }
            }
        };

        let wait = wake_at.saturating_duration_since(Instant::now());
        info!(
            service = %self.service,
            wait_secs = wait.as_secs_f64(),
            "all tokens rate limited, waiting for next reset"
        );
        metrics::counter!("token_pool_waits_total", "service" => self.service.clone()).increment(1);
        tokio::time::sleep_until(wake_at).await;

        let mut tokens = self.tokens.lock().await;
        let now = Instant::now();
        reinstate_elapsed(&mut tokens, now);
        match select_best(&mut tokens, now) {
            Some(selected) => {
                debug!(service = %self.service, token_id = selected.id, "token selected after wait");
                Ok(selected)
            }
            None => {
                warn!(service = %self.service, "no token became available after waiting");
                metrics::counter!("token_pool_exhausted_total", "service" => self.service.clone())
                    .increment(1);
                Err(self.exhausted(&tokens, now))
            }
        }
    }

    /// Park a token until `reset_at`, recording the last-known quota.
    pub async fn mark_rate_limited(&self, id: usize, reset_at: Instant, remaining: u64, limit: u64) {
        let mut tokens = self.tokens.lock().await;
        let Some(state) = tokens.get_mut(id) else {
            warn!(service = %self.service, token_id = id, "rate limit reported for unknown token");
            return;
        };
        state.available = false;
        state.reset_at = Some(reset_at);
        state.remaining = Some(remaining);
        state.limit = Some(limit);
        debug!(
            service = %self.service,
            token = %state.secret.masked(),
            reset_in_secs = reset_at.saturating_duration_since(Instant::now()).as_secs(),
            "token rate limited"
        );
    }

    /// Record observed quota. A token with less than 10% of `limit` left is
    /// marked unavailable; otherwise it is marked available.
    ///
    /// With no known limit, only an exhausted quota (`remaining == 0`) parks
    /// the token.
    pub async fn update_quota(&self, id: usize, remaining: u64, limit: Option<u64>) {
        let mut tokens = self.tokens.lock().await;
        let Some(state) = tokens.get_mut(id) else {
            warn!(service = %self.service, token_id = id, "quota reported for unknown token");
            return;
        };
        state.remaining = Some(remaining);
        if limit.is_some() {
            state.limit = limit;
        }
        state.available = match limit {
            Some(limit) => remaining.saturating_mul(10) >= limit,
            None => remaining > 0,
        };
        if !state.available {
            debug!(
                service = %self.service,
                token = %state.secret.masked(),
                remaining,
                limit,
                "token quota low, deprioritized"
            );
        }
    }

    /// Snapshot of every token's state.
    pub async fn stats(&self) -> Vec<TokenStats> {
        let tokens = self.tokens.lock().await;
        let now = Instant::now();
        tokens
            .iter()
            .enumerate()
            .map(|(id, t)| TokenStats {
                id,
                token: t.secret.masked(),
                available: t.available,
                reset_in_secs: t
                    .reset_at
                    .filter(|at| *at > now)
                    .map(|at| (at - now).as_secs()),
                remaining: t.remaining,
                limit: t.limit,
            })
            .collect()
    }

    fn exhausted(&self, tokens: &[TokenState], now: Instant) -> Error {
        Error::Exhausted {
            service: self.service.clone(),
            total: tokens.len(),
            rate_limited: tokens.iter().filter(|t| !t.eligible(now)).count(),
        }
    }
}

/// Pick and stamp the best eligible token.
fn select_best(tokens: &mut [TokenState], now: Instant) -> Option<SelectedToken> {
    // `None` sorts before any instant, so never-used tokens win ties.
    let (id, state) = tokens
        .iter_mut()
        .enumerate()
        .filter(|(_, t)| t.eligible(now))
        .min_by_key(|(_, t)| (Reverse(t.remaining.unwrap_or(0)), t.reset_at))?;
    state.reset_at = Some(now);
    Some(SelectedToken {
        id,
        token: state.secret.clone(),
    })
}

/// Make every token whose deadline has passed available again.
fn reinstate_elapsed(tokens: &mut [TokenState], now: Instant) -> usize {
    let mut recovered = 0;
    for state in tokens.iter_mut() {
        if !state.available && state.reset_at.is_some_and(|at| at <= now) {
            state.available = true;
            state.reset_at = Some(now);
            recovered += 1;
        }
    }
    recovered
}

fn soonest_reset(tokens: &[TokenState], now: Instant) -> Option<Instant> {
    tokens
        .iter()
        .filter_map(|t| t.reset_at)
        .filter(|at| *at > now)
        .min()
}

/// Convert a unix reset timestamp (seconds) into a pool deadline.
///
/// Timestamps at or before the current wall-clock time map to "now". Returns
/// `None` for timestamps more than `MAX_RESET_HORIZON` away, which no service
/// sends for a real quota window.
pub fn reset_instant(reset_epoch_secs: u64) -> Option<Instant> {
    let now_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let wait = Duration::from_secs(reset_epoch_secs.saturating_sub(now_epoch));
    if wait > MAX_RESET_HORIZON {
        return None;
    }
    Instant::now().checked_add(wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool(tokens: &[&str]) -> TokenPool {
        TokenPool::new("github", tokens.iter().map(|t| t.to_string()).collect())
    }

    #[tokio::test]
    async fn acquire_returns_a_configured_token() {
        let pool = pool(&["token1", "token2"]);
        let selected = pool.acquire().await.unwrap();
        assert!(["token1", "token2"].contains(&selected.token.expose().as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_tokens_rotate_least_recently_used() {
        let pool = pool(&["a", "b", "c"]);
        let ids: Vec<usize> = [
            pool.acquire().await.unwrap().id,
            pool.acquire().await.unwrap().id,
            pool.acquire().await.unwrap().id,
        ]
        .to_vec();
        assert_eq!(ids, vec![0, 1, 2]);

        tokio::time::advance(Duration::from_secs(1)).await;
        // All stamped at the same instant; "a" was stamped first and ties go to the lowest id.
        assert_eq!(pool.acquire().await.unwrap().id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prefers_highest_remaining_quota() {
        let pool = pool(&["a", "b", "c"]);
        pool.update_quota(0, 1_000, Some(5_000)).await;
        pool.update_quota(1, 4_000, Some(5_000)).await;
        // "c" has unknown quota, which ranks lowest.
        for _ in 0..3 {
            assert_eq!(pool.acquire().await.unwrap().id, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_returns_token_with_future_reset() {
        let pool = pool(&["a", "b"]);
        pool.mark_rate_limited(0, Instant::now() + Duration::from_secs(3600), 0, 5_000)
            .await;
        for _ in 0..10 {
            assert_eq!(pool.acquire().await.unwrap().id, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_single_rate_limited_token() {
        let pool = pool(&["only"]);
        let start = Instant::now();
        pool.mark_rate_limited(0, start + Duration::from_secs(1), 0, 5_000)
            .await;

        let selected = pool.acquire().await.unwrap();

        assert_eq!(selected.id, 0);
        assert_eq!(selected.token.expose(), "only");
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_secs(1) + RESET_BUFFER,
            "waited {waited:?}"
        );
        assert!(waited < Duration::from_secs(4), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn not_returned_before_reset_plus_buffer() {
        let pool = Arc::new(pool(&["only"]));
        let reset = Instant::now() + Duration::from_secs(10);
        pool.mark_rate_limited(0, reset, 0, 5_000).await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.acquire().await.unwrap();
                Instant::now()
            })
        };
        let returned_at = waiter.await.unwrap();
        assert!(returned_at >= reset + RESET_BUFFER);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_reset_is_reinstated_without_waiting() {
        let pool = pool(&["only"]);
        pool.mark_rate_limited(0, Instant::now() + Duration::from_secs(1), 0, 5_000)
            .await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let start = Instant::now();
        assert_eq!(pool.acquire().await.unwrap().id, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(pool.stats().await[0].available);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_soonest_of_several_resets() {
        let pool = pool(&["a", "b"]).with_reset_buffer(Duration::ZERO);
        let start = Instant::now();
        pool.mark_rate_limited(0, start + Duration::from_secs(30), 0, 5_000)
            .await;
        pool.mark_rate_limited(1, start + Duration::from_secs(5), 0, 5_000)
            .await;

        assert_eq!(pool.acquire().await.unwrap().id, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_is_released_while_waiting() {
        let pool = Arc::new(pool(&["only"]));
        pool.mark_rate_limited(0, Instant::now() + Duration::from_secs(60), 0, 5_000)
            .await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::task::yield_now().await;

        let stats = tokio::time::timeout(Duration::from_millis(10), pool.stats())
            .await
            .expect("stats must not block behind a sleeping acquire");
        assert_eq!(stats.len(), 1);
        assert!(!stats[0].available);

        assert_eq!(waiter.await.unwrap().unwrap().id, 0);
    }

    #[tokio::test]
    async fn low_quota_token_without_deadline_is_exhausted() {
        let pool = pool(&["only"]);
        pool.update_quota(0, 0, Some(5_000)).await;

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Exhausted {
                total: 1,
                rate_limited: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_pool_is_exhausted() {
        let pool = pool(&[]);
        assert!(pool.stats().await.is_empty());
        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("exhausted"), "got: {err}");
    }

    #[tokio::test]
    async fn update_quota_applies_ten_percent_threshold() {
        let pool = pool(&["a"]);

        pool.update_quota(0, 499, Some(5_000)).await;
        assert!(!pool.stats().await[0].available);

        pool.update_quota(0, 500, Some(5_000)).await;
        assert!(pool.stats().await[0].available);

        pool.update_quota(0, 4_999, Some(5_000)).await;
        let stats = pool.stats().await;
        assert!(stats[0].available);
        assert_eq!(stats[0].remaining, Some(4_999));
        assert_eq!(stats[0].limit, Some(5_000));
    }

    #[tokio::test]
    async fn update_quota_without_limit_parks_only_when_exhausted() {
        let pool = pool(&["a"]);
        pool.update_quota(0, 1, None).await;
        assert!(pool.stats().await[0].available);
        pool.update_quota(0, 0, None).await;
        assert!(!pool.stats().await[0].available);
    }

    #[tokio::test(start_paused = true)]
    async fn low_quota_token_is_used_only_when_nothing_else_is_left() {
        let pool = pool(&["a", "b"]);
        // Stamp both as used, then park "a" on quota.
        pool.acquire().await.unwrap();
        pool.acquire().await.unwrap();
        pool.update_quota(0, 10, Some(5_000)).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(pool.acquire().await.unwrap().id, 1);

        pool.mark_rate_limited(1, Instant::now() + Duration::from_secs(600), 0, 5_000)
            .await;
        // "a" has a past last-used stamp, so it is reinstated rather than waited on.
        assert_eq!(pool.acquire().await.unwrap().id, 0);
    }

    #[tokio::test]
    async fn mark_rate_limited_records_quota() {
        let pool = pool(&["token1"]);
        pool.mark_rate_limited(0, Instant::now() + Duration::from_secs(5), 0, 5_000)
            .await;
        let stats = pool.stats().await;
        assert!(!stats[0].available);
        assert_eq!(stats[0].remaining, Some(0));
        assert_eq!(stats[0].limit, Some(5_000));
        assert!(stats[0].reset_in_secs.is_some_and(|s| s <= 5));
    }

    #[tokio::test]
    async fn unknown_ids_are_ignored() {
        let pool = pool(&["a"]);
        pool.mark_rate_limited(7, Instant::now(), 0, 0).await;
        pool.update_quota(7, 0, Some(100)).await;
        assert!(pool.stats().await[0].available);
    }

    #[tokio::test]
    async fn stats_never_expose_full_secret() {
        let pool = pool(&["ghp_0123456789abcdefghij"]);
        let stats = pool.stats().await;
        assert_eq!(stats[0].token, "ghp_0123...");
        let json = serde_json::to_string(&stats).unwrap();
        assert!(!json.contains("abcdefghij"));
    }

    #[tokio::test]
    async fn concurrent_acquires_all_succeed() {
        let pool = Arc::new(pool(&["a", "b", "c"]));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.acquire().await }));
        }
        for handle in handles {
            let selected = handle.await.unwrap().unwrap();
            assert!(selected.id < 3);
        }
    }

    #[test]
    fn reset_instant_clamps_past_timestamps() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let before = Instant::now();
            let at = reset_instant(0).unwrap();
            assert!(at >= before && at <= Instant::now());

            let now_epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs();
            let at = reset_instant(now_epoch + 60).unwrap();
            let delta = at.saturating_duration_since(Instant::now());
            assert!(delta > Duration::from_secs(58) && delta <= Duration::from_secs(60));
        });
    }

    #[test]
    fn reset_instant_rejects_far_future_timestamps() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            assert_eq!(reset_instant(u64::MAX), None);

            let now_epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs();
            assert_eq!(reset_instant(now_epoch + 2 * MAX_RESET_HORIZON.as_secs()), None);
            assert!(reset_instant(now_epoch + 3600).is_some());
        });
    }
}
