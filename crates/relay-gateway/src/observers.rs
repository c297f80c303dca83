//! Typed lifecycle observers.
//!
//! Explicit registration with disposable handles instead of an ambient
//! event bus: presence tracking, usage accounting, and similar
//! collaborators subscribe here without being wired into the core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::clients::ClientContext;
use crate::endpoint::{Endpoint, EndpointId};
use crate::identity::ConnectionRequest;

/// Callbacks for the four lifecycle notifications.
///
/// All methods default to no-ops so observers implement only what they
/// care about. Callbacks run synchronously on the emitting task and
/// outside any gateway lock; keep them cheap.
pub trait GatewayObserver: Send + Sync {
    /// A connection's endpoint was constructed and registered.
    ///
    /// The endpoint instance is handed over so observers (presence
    /// tracking, usage accounting) can interact with it directly.
    fn connection_created(
        &self,
        _id: &EndpointId,
        _endpoint: &Arc<dyn Endpoint>,
        _request: &ConnectionRequest,
    ) {
    }

    /// A connection closed and its endpoint was disposed.
    fn connection_closed(
        &self,
        _id: &EndpointId,
        _endpoint: &Arc<dyn Endpoint>,
        _request: &ConnectionRequest,
    ) {
    }

    /// A client context was created (first connection for an identity).
    fn context_created(&self, _context: &Arc<ClientContext>) {}

    /// A client context was evicted (last connection closed).
    fn context_closed(&self, _context: &Arc<ClientContext>) {}
}

/// Registration point for [`GatewayObserver`]s.
pub struct ObserverSet {
    observers: Mutex<HashMap<u64, Arc<dyn GatewayObserver>>>,
    next_id: AtomicU64,
}

impl ObserverSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Subscribe an observer; dropping the returned handle (or calling
    /// [`Subscription::unsubscribe`]) removes it.
    pub fn subscribe(self: &Arc<Self>, observer: Arc<dyn GatewayObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.observers.lock().insert(id, observer);
        Subscription {
            set: Arc::downgrade(self),
            id,
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Whether no observers are subscribed.
    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    fn remove(&self, id: u64) {
        let _ = self.observers.lock().remove(&id);
    }

    // Snapshot under the lock, call outside it.
    fn snapshot(&self) -> Vec<Arc<dyn GatewayObserver>> {
        self.observers.lock().values().cloned().collect()
    }

    pub(crate) fn emit_connection_created(
        &self,
        id: &EndpointId,
        endpoint: &Arc<dyn Endpoint>,
        request: &ConnectionRequest,
    ) {
        for observer in self.snapshot() {
            observer.connection_created(id, endpoint, request);
        }
    }

    pub(crate) fn emit_connection_closed(
        &self,
        id: &EndpointId,
        endpoint: &Arc<dyn Endpoint>,
        request: &ConnectionRequest,
    ) {
        for observer in self.snapshot() {
            observer.connection_closed(id, endpoint, request);
        }
    }

    pub(crate) fn emit_context_created(&self, context: &Arc<ClientContext>) {
        for observer in self.snapshot() {
            observer.context_created(context);
        }
    }

    pub(crate) fn emit_context_closed(&self, context: &Arc<ClientContext>) {
        for observer in self.snapshot() {
            observer.context_closed(context);
        }
    }
}

impl Default for ObserverSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one observer registration; unsubscribes on drop.
pub struct Subscription {
    set: Weak<ObserverSet>,
    id: u64,
}

impl Subscription {
    /// Remove the observer now instead of waiting for drop.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}
