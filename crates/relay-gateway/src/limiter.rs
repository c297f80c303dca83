//! Rate limiting seam and the in-tree fixed-window limiter.
//!
//! Quota is keyed by client id, not by connection, so every
//! simultaneous connection of one identity draws from the same budget.
//! The concrete algorithm is swappable behind [`RateLimiter`]; a
//! limiter malfunction (`Err`) is distinct from a quota rejection and
//! is surfaced to the pipeline as an internal fault.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome of a quota check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    /// The call may proceed.
    Allowed,
    /// The call is over quota.
    Limited {
        /// Time until the quota refills.
        retry_after: Duration,
    },
}

/// Per-client quota check, consumed by the call pipeline.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one unit of quota for `client_id` calling `method`.
    ///
    /// `Err` signals a limiter malfunction, not a rejection.
    async fn consume(&self, client_id: &str, method: &str) -> anyhow::Result<RateDecision>;
}

/// Settings for the in-tree fixed-window limiter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per window.
    pub limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 120,
            window_secs: 60,
        }
    }
}

struct Window {
    started: Instant,
    count: u32,
}

struct LimiterState {
    windows: HashMap<String, Window>,
    last_sweep: Instant,
}

/// Fixed-window limiter keyed by client id.
///
/// All methods of one client share the window. Entries reset lazily on
/// the first call after the window elapses; fully elapsed entries are
/// swept at most once per window length, so ids that never return
/// (one-shot session clients in particular) do not accumulate.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl FixedWindowLimiter {
    /// Create a limiter from config.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_window(config.limit, Duration::from_secs(config.window_secs))
    }

    /// Create a limiter with an explicit window length.
    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn check(&self, client_id: &str) -> RateDecision {
        let now = Instant::now();
        let mut state = self.state.lock();

        // An elapsed window would reset on its next touch anyway, so
        // dropping it loses nothing.
        if now.duration_since(state.last_sweep) >= self.window {
            state
                .windows
                .retain(|_, w| now.duration_since(w.started) < self.window);
            state.last_sweep = now;
        }

        let window = state.windows.entry(client_id.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        if window.count < self.limit {
            window.count += 1;
            RateDecision::Allowed
        } else {
            let elapsed = now.duration_since(window.started);
            RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn consume(&self, client_id: &str, _method: &str) -> anyhow::Result<RateDecision> {
        Ok(self.check(client_id))
    }
}
