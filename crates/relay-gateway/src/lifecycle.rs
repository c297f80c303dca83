//! Connection lifecycle orchestration.
//!
//! [`Gateway::on_connection_established`] is the single entry point the
//! transport layer calls when a connection comes up. It resolves the
//! identity, creates exactly one endpoint, registers it before any call
//! can be routed, and returns a [`ConnectionHandle`] through which the
//! transport routes calls and signals close. Teardown is idempotent and
//! best-effort: a logged anomaly never stops cleanup from completing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_rpc::{RpcError, RpcRequest, RpcResponse};

use crate::access::AccessPolicy;
use crate::clients::ClientRegistry;
use crate::config::GatewayConfig;
use crate::endpoint::{ConnectionMetadata, Endpoint, EndpointFactory, EndpointId, EndpointInit};
use crate::identity::{ClientIdentity, ConnectionRequest};
use crate::limiter::RateLimiter;
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
};
use crate::observers::ObserverSet;
use crate::outbound::OutboundChannel;
use crate::pipeline::CallPipeline;
use crate::session::{NoopSessionProbe, SessionProbe};

/// The gateway core: composes identity resolution, the client
/// registry, endpoint construction, and the interceptor pipeline.
pub struct Gateway {
    config: GatewayConfig,
    clients: Arc<ClientRegistry>,
    observers: Arc<ObserverSet>,
    factory: Arc<dyn EndpointFactory>,
    access: Arc<dyn AccessPolicy>,
    limiter: Arc<dyn RateLimiter>,
    probe: Arc<dyn SessionProbe>,
}

impl Gateway {
    /// Create a gateway wired to its consumed collaborators.
    pub fn new(
        config: GatewayConfig,
        factory: Arc<dyn EndpointFactory>,
        access: Arc<dyn AccessPolicy>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let observers = Arc::new(ObserverSet::new());
        Self {
            config,
            clients: Arc::new(ClientRegistry::new(observers.clone())),
            observers,
            factory,
            access,
            limiter,
            probe: Arc::new(NoopSessionProbe),
        }
    }

    /// Replace the session-liveness probe.
    #[must_use]
    pub fn with_session_probe(mut self, probe: Arc<dyn SessionProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Subscription point for lifecycle observers.
    pub fn observers(&self) -> &Arc<ObserverSet> {
        &self.observers
    }

    /// The client registry (read-mostly; mutated only by this controller).
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// The gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Create an outbound channel pair sized per config; the transport
    /// keeps the receiver and pumps it into its write half.
    pub fn outbound_channel(
        &self,
        id: impl Into<String>,
    ) -> (OutboundChannel, mpsc::Receiver<Arc<String>>) {
        OutboundChannel::bounded(id, self.config.outbound_buffer)
    }

    /// Hook called by the transport when a connection is established.
    ///
    /// On success the endpoint is registered in its client context and
    /// "connection created" has fired; the returned handle is the only
    /// way calls reach the endpoint, so registration happens-before any
    /// routing. On factory failure nothing is registered.
    pub async fn on_connection_established(
        &self,
        outbound: OutboundChannel,
        request: ConnectionRequest,
    ) -> anyhow::Result<ConnectionHandle> {
        let identity = ClientIdentity::resolve(&request);
        let endpoint_id = EndpointId::generate();

        let guard = match &request.access_override {
            Some(guard) => guard.clone(),
            None => self.access.guard_for(request.principal.as_ref()),
        };

        let init = EndpointInit {
            outbound,
            principal: request.principal.clone(),
            guard: guard.clone(),
            identity: identity.clone(),
            metadata: ConnectionMetadata::from_request(&request),
        };
        let endpoint = self
            .factory
            .create(init)
            .await
            .context("endpoint construction failed")?;

        let registration = self.clients.register(&identity, endpoint_id.clone());
        debug!(
            client_id = %identity.id,
            endpoints = registration.context.endpoint_count(),
            context_created = registration.created,
            "endpoint registered"
        );

        let pipeline = CallPipeline::new(
            identity.clone(),
            endpoint.clone(),
            self.limiter.clone(),
            guard,
            self.probe.clone(),
            Duration::from_secs(self.config.dispatch_timeout_secs),
        );

        info!(client_id = %identity.id, endpoint = %endpoint_id, "connection established");
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        self.observers
            .emit_connection_created(&endpoint_id, &endpoint, &request);

        Ok(ConnectionHandle {
            endpoint_id,
            identity,
            endpoint,
            pipeline,
            clients: self.clients.clone(),
            observers: self.observers.clone(),
            request,
            opened_at: Instant::now(),
            closed: AtomicBool::new(false),
        })
    }
}

/// One live connection as seen by the transport: routes calls through
/// the pipeline and tears the connection down exactly once.
pub struct ConnectionHandle {
    endpoint_id: EndpointId,
    identity: ClientIdentity,
    endpoint: Arc<dyn Endpoint>,
    pipeline: CallPipeline,
    clients: Arc<ClientRegistry>,
    observers: Arc<ObserverSet>,
    request: ConnectionRequest,
    opened_at: Instant,
    closed: AtomicBool,
}

impl ConnectionHandle {
    /// The endpoint handle registered for this connection.
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    /// The identity owning this connection.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Route one inbound call through the interceptor pipeline.
    pub async fn handle_call(&self, request: RpcRequest) -> RpcResponse {
        if self.is_closed() {
            let id = request.id.as_deref().unwrap_or("unknown").to_owned();
            return RpcResponse::from_error(
                id,
                &RpcError::InvalidRequest {
                    message: "connection is closed".into(),
                },
            );
        }
        self.pipeline.handle(request).await
    }

    /// Tear the connection down: dispose the endpoint, release it from
    /// the client context (evicting the context if this was the last
    /// endpoint), and notify observers. Idempotent; in-flight calls are
    /// not cancelled, their late results die in the closed outbound
    /// channel.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.endpoint.dispose().await;

        let release = self.clients.release(&self.identity.id, &self.endpoint_id);
        if release.closed.is_some() {
            debug!(client_id = %self.identity.id, "last endpoint closed, context evicted");
        }

        self.observers
            .emit_connection_closed(&self.endpoint_id, &self.endpoint, &self.request);

        info!(client_id = %self.identity.id, endpoint = %self.endpoint_id, "connection closed");
        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(CONNECTION_DURATION_SECONDS).record(self.opened_at.elapsed().as_secs_f64());
    }
}
