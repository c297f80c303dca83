//! Session liveness seam.
//!
//! The pipeline touches the transport's session marker once per
//! dispatched call that carries a session, keeping idle-timeout
//! tracking honest without the caller polling.

#[cfg(test)]
use mockall::automock;

/// Refreshes a session-liveness marker owned by the transport.
#[cfg_attr(test, automock)]
pub trait SessionProbe: Send + Sync {
    /// Mark `session_id` as recently active.
    fn touch(&self, session_id: &str);
}

/// Probe that does nothing; the default when the transport has no
/// idle-timeout tracking.
pub struct NoopSessionProbe;

impl SessionProbe for NoopSessionProbe {
    fn touch(&self, _session_id: &str) {}
}
