//! Authorization seams.
//!
//! The gateway never decides access itself; it consumes an
//! [`AccessGuard`] per connection and evaluates it on every call
//! (decisions may depend on per-call resource state, so they are never
//! cached). An [`AccessPolicy`] composes the guard from the
//! authenticated principal, falling back to deny-all when there is none.

use std::collections::HashSet;
use std::sync::Arc;

use crate::identity::Principal;

/// Per-call capability check, side-effect free from the gateway's view.
pub trait AccessGuard: Send + Sync {
    /// Whether the bound client may invoke `method`.
    fn can_access(&self, method: &str) -> bool;
}

/// Guard that admits every method.
pub struct AllowAll;

impl AccessGuard for AllowAll {
    fn can_access(&self, _method: &str) -> bool {
        true
    }
}

/// Guard that refuses every method.
pub struct DenyAll;

impl AccessGuard for DenyAll {
    fn can_access(&self, _method: &str) -> bool {
        false
    }
}

/// Guard admitting an explicit set of methods.
///
/// Backs the transport's pre-resolved allow-list override.
pub struct MethodAllowList {
    methods: HashSet<String>,
}

impl MethodAllowList {
    /// Build an allow-list from method names.
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessGuard for MethodAllowList {
    fn can_access(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

/// Composes the per-connection guard from the resolved principal.
pub trait AccessPolicy: Send + Sync {
    /// Guard for a connection owned by `principal` (or none).
    fn guard_for(&self, principal: Option<&Principal>) -> Arc<dyn AccessGuard>;
}

/// Policy that denies unauthenticated connections outright and builds
/// a principal-scoped guard for authenticated ones.
pub struct DenyUnauthenticated {
    make_guard: Arc<dyn Fn(&Principal) -> Arc<dyn AccessGuard> + Send + Sync>,
}

impl DenyUnauthenticated {
    /// Create the policy with a factory for authenticated guards.
    pub fn new(
        make_guard: impl Fn(&Principal) -> Arc<dyn AccessGuard> + Send + Sync + 'static,
    ) -> Self {
        Self {
            make_guard: Arc::new(make_guard),
        }
    }
}

impl AccessPolicy for DenyUnauthenticated {
    fn guard_for(&self, principal: Option<&Principal>) -> Arc<dyn AccessGuard> {
        match principal {
            Some(principal) => (self.make_guard)(principal),
            None => Arc::new(DenyAll),
        }
    }
}
