//! Sliding-window rate limiting with temporary blocks, keyed by client identifier.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};

/// Per-call-site limits; these are not global constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_seconds: i64,
    pub block_seconds: i64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_seconds: 300,
            block_seconds: 900,
        }
    }
}

impl RateLimitPolicy {
    fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds)
    }

    fn block(&self) -> Duration {
        Duration::seconds(self.block_seconds)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// Rejected; the client should back off for `retry_after` seconds.
    Limited { retry_after: i64 },
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, id: &str, policy: &RateLimitPolicy) -> RateLimitDecision;
}

/// Limiter that admits everything; useful while wiring or in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _id: &str, _policy: &RateLimitPolicy) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Default)]
struct ClientState {
    /// Admission timestamps in increasing order; pruned from the front.
    hits: VecDeque<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
}

/// In-memory sliding-window limiter.
///
/// A window evaluates only the trailing `window_seconds`, so there is no
/// fixed-bucket boundary to burst across; once the count threshold is hit a
/// hard block is layered on top, making sustained probing pay a full
/// `block_seconds` penalty each time.
///
/// Construct one instance at process start and share it by handle; the whole
/// prune/count/append/block step runs under one lock so concurrent requests
/// from the same identifier cannot over-admit.
pub struct SlidingWindowLimiter {
    clients: Mutex<HashMap<String, ClientState>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Requests left in the current window for `id`, ignoring block state.
    #[must_use]
    pub fn remaining(&self, id: &str, policy: &RateLimitPolicy) -> u32 {
        let now = self.clock.now();
        let mut clients = self.clients.lock();
        let Some(state) = clients.get_mut(id) else {
            return policy.max_requests;
        };
        prune(&mut state.hits, now - policy.window());
        let count = u32::try_from(state.hits.len()).unwrap_or(u32::MAX);
        policy.max_requests.saturating_sub(count)
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, id: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        let now = self.clock.now();
        let mut clients = self.clients.lock();
        let state = clients.entry(id.to_string()).or_default();

        // An active block short-circuits without touching the window.
        if let Some(blocked_until) = state.blocked_until {
            if now < blocked_until {
                return RateLimitDecision::Limited {
                    retry_after: policy.block_seconds,
                };
            }
            state.blocked_until = None;
        }

        prune(&mut state.hits, now - policy.window());

        if state.hits.len() >= policy.max_requests as usize {
            // The triggering request is not appended; the block replaces it.
            state.blocked_until = Some(now + policy.block());
            return RateLimitDecision::Limited {
                retry_after: policy.block_seconds,
            };
        }

        state.hits.push_back(now);
        RateLimitDecision::Allowed
    }
}

fn prune(hits: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while hits.front().is_some_and(|&hit| hit < cutoff) {
        hits.pop_front();
    }
}
