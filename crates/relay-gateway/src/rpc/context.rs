//! Per-call context handed to method handlers.

use std::time::Instant;

use crate::identity::ClientIdentity;

/// Ephemeral state for one inbound call.
///
/// Created by the pipeline just before dispatch and dropped when the
/// call completes; never persisted.
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Method being invoked.
    pub method: String,
    /// Resolved identity of the caller.
    pub identity: ClientIdentity,
    /// When the pipeline accepted the call.
    pub started: Instant,
}

impl CallContext {
    /// Create a context for a call starting now.
    pub fn new(method: impl Into<String>, identity: ClientIdentity) -> Self {
        Self {
            method: method.into(),
            identity,
            started: Instant::now(),
        }
    }

    /// Time since the pipeline accepted the call.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}
