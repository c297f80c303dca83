//! Backend endpoint contract.
//!
//! One endpoint is the backend-handler instance bound to one
//! connection: created by the consumed [`EndpointFactory`] when the
//! connection is established, disposed exactly once when it closes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::access::AccessGuard;
use crate::identity::{ClientIdentity, ConnectionRequest, Principal};
use crate::outbound::OutboundChannel;
use crate::rpc::registry::MethodRegistry;

/// Opaque handle identifying one endpoint within a client context.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EndpointId(String);

impl EndpointId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection facts handed to the endpoint at construction.
#[derive(Clone, Debug, Default)]
pub struct ConnectionMetadata {
    /// Originating address, if known.
    pub remote_addr: Option<String>,
    /// Declared client kind.
    pub client_kind: Option<String>,
    /// Client-supplied headers of interest.
    pub headers: HashMap<String, String>,
}

impl ConnectionMetadata {
    /// Extract metadata from a connection request.
    pub fn from_request(request: &ConnectionRequest) -> Self {
        Self {
            remote_addr: request.remote_addr.clone(),
            client_kind: request.client_kind.clone(),
            headers: request.headers.clone(),
        }
    }
}

/// Everything an endpoint needs to initialize.
pub struct EndpointInit {
    /// Server-to-client proxy for outbound calls.
    pub outbound: OutboundChannel,
    /// Underlying principal, when authenticated.
    pub principal: Option<Principal>,
    /// The guard this connection's calls will be checked against.
    pub guard: Arc<dyn AccessGuard>,
    /// Resolved identity of the connection's owner.
    pub identity: ClientIdentity,
    /// Connection facts (address, client kind, headers).
    pub metadata: ConnectionMetadata,
}

/// Backend-handler instance bound to one connection (consumed contract).
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The typed method table calls are dispatched against.
    fn registry(&self) -> &MethodRegistry;

    /// Release backend resources. Called exactly once, on close.
    async fn dispose(&self) {}
}

/// Creates one endpoint per established connection (consumed contract).
#[async_trait]
pub trait EndpointFactory: Send + Sync {
    /// Construct and initialize an endpoint for a new connection.
    async fn create(&self, init: EndpointInit) -> anyhow::Result<Arc<dyn Endpoint>>;
}
