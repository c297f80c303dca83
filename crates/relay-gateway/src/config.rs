//! Gateway configuration.

use serde::{Deserialize, Serialize};

use crate::limiter::RateLimitConfig;

/// Configuration for the gateway core.
///
/// Loading (files, env) is the host process's job; this is the plain
/// value it produces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Outbound channel capacity per connection.
    pub outbound_buffer: usize,
    /// Maximum time a single dispatched handler may run.
    pub dispatch_timeout_secs: u64,
    /// Settings for the built-in per-client rate limiter.
    pub rate_limit: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 1024,
            dispatch_timeout_secs: 60,
            rate_limit: RateLimitConfig::default(),
        }
    }
}
