//! Client registry: one context per live client identity.
//!
//! The registry is the only state shared across all connections. It is
//! mutated only by the lifecycle controller's register/release calls;
//! both hold the map lock for the whole create/remove critical section
//! (no awaits inside), so interleaved connection opens and closes can
//! never produce two contexts for one identity or evict a context that
//! still holds a live endpoint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::gauge;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::endpoint::EndpointId;
use crate::identity::ClientIdentity;
use crate::metrics::CLIENT_CONTEXTS_ACTIVE;
use crate::observers::ObserverSet;

/// Aggregate of all endpoints currently open for one identity.
///
/// Created on an identity's first connection, evicted the instant its
/// endpoint set becomes empty; a later reconnect gets a fresh context
/// sharing the same semantic id.
pub struct ClientContext {
    identity: ClientIdentity,
    endpoints: Mutex<HashSet<EndpointId>>,
}

impl ClientContext {
    /// Create an empty context for an identity.
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            endpoints: Mutex::new(HashSet::new()),
        }
    }

    /// The identity owning this context.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Number of currently registered endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Whether no endpoints remain.
    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }

    /// Currently registered endpoint handles.
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.endpoints.lock().iter().cloned().collect()
    }

    fn add(&self, endpoint: EndpointId) -> bool {
        self.endpoints.lock().insert(endpoint)
    }

    fn remove(&self, endpoint: &EndpointId) -> bool {
        self.endpoints.lock().remove(endpoint)
    }
}

/// Outcome of registering an endpoint.
pub struct Registration {
    /// The (possibly freshly created) context for the identity.
    pub context: Arc<ClientContext>,
    /// Whether this registration created the context.
    pub created: bool,
}

/// Outcome of releasing an endpoint.
pub struct Release {
    /// Whether the endpoint was actually registered.
    pub removed: bool,
    /// The evicted context when this was its last endpoint.
    pub closed: Option<Arc<ClientContext>>,
}

/// Registry keyed by client id.
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<ClientContext>>>,
    observers: Arc<ObserverSet>,
}

impl ClientRegistry {
    /// Create an empty registry emitting context notifications to
    /// `observers`.
    pub fn new(observers: Arc<ObserverSet>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            observers,
        }
    }

    /// Get or create the context for `identity` and register `endpoint`
    /// into it, atomically with respect to concurrent releases.
    ///
    /// Emits "context created" exactly once per context creation.
    pub fn register(&self, identity: &ClientIdentity, endpoint: EndpointId) -> Registration {
        let (context, created, added) = {
            let mut clients = self.clients.lock();
            let (context, created) = match clients.get(&identity.id) {
                Some(context) => (context.clone(), false),
                None => {
                    let context = Arc::new(ClientContext::new(identity.clone()));
                    let _ = clients.insert(identity.id.clone(), context.clone());
                    (context, true)
                }
            };
            let added = context.add(endpoint.clone());
            (context, created, added)
        };

        if !added {
            // Registration happens exactly once per connection; a repeat
            // is a bookkeeping bug upstream, tolerated and counted once.
            warn!(client_id = %identity.id, endpoint = %endpoint, "duplicate endpoint registration");
        }
        if created {
            debug!(client_id = %identity.id, "client context created");
            gauge!(CLIENT_CONTEXTS_ACTIVE).increment(1.0);
            self.observers.emit_context_created(&context);
        }
        Registration { context, created }
    }

    /// Remove `endpoint` from the context for `client_id`, evicting the
    /// context when its endpoint set becomes empty.
    ///
    /// Emits "context closed" exactly once, only on the non-empty to
    /// empty transition. Unknown ids are logged anomalies, never errors,
    /// so teardown always completes.
    pub fn release(&self, client_id: &str, endpoint: &EndpointId) -> Release {
        let (removed, closed) = {
            let mut clients = self.clients.lock();
            match clients.get(client_id).cloned() {
                Some(context) => {
                    let removed = context.remove(endpoint);
                    let closed = if context.is_empty() {
                        let _ = clients.remove(client_id);
                        Some(context)
                    } else {
                        None
                    };
                    (removed, closed)
                }
                None => (false, None),
            }
        };

        if !removed {
            warn!(client_id, endpoint = %endpoint, "released endpoint was not registered");
        }
        if let Some(context) = &closed {
            debug!(client_id, "client context closed");
            gauge!(CLIENT_CONTEXTS_ACTIVE).decrement(1.0);
            self.observers.emit_context_closed(context);
        }
        Release { removed, closed }
    }

    /// Look up the live context for a client id.
    pub fn get(&self, client_id: &str) -> Option<Arc<ClientContext>> {
        self.clients.lock().get(client_id).cloned()
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.clients.lock().len()
    }
}
