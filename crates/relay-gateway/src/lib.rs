//! # relay-gateway
//!
//! Server-side front end for bidirectional RPC connections.
//!
//! - Identity resolution: maps a transport request context to the
//!   logical client (user, session, or anonymous) that owns it
//! - Client registry: one [`clients::ClientContext`] per live client id,
//!   aggregating every open connection for that identity
//! - Call interceptor pipeline: metrics, tracing, rate limiting, and
//!   authorization applied to every inbound call, in that order
//! - Connection lifecycle: endpoint construction, registration, and
//!   exactly-once teardown, with typed lifecycle observers
//!
//! The wire transport, authentication, quota algorithm, and
//! authorization decision logic are external collaborators consumed
//! through the narrow traits in [`limiter`], [`access`], [`endpoint`],
//! and [`session`].

#![deny(unsafe_code)]

pub mod access;
pub mod clients;
pub mod config;
pub mod endpoint;
pub mod identity;
pub mod lifecycle;
pub mod limiter;
pub mod metrics;
pub mod observers;
pub mod outbound;
pub mod pipeline;
pub mod rpc;
pub mod session;

pub use access::{AccessGuard, AccessPolicy};
pub use clients::{ClientContext, ClientRegistry};
pub use config::GatewayConfig;
pub use endpoint::{Endpoint, EndpointFactory, EndpointId, EndpointInit};
pub use identity::{AuthLevel, ClientIdentity, ConnectionRequest, Principal};
pub use lifecycle::{ConnectionHandle, Gateway};
pub use limiter::{RateDecision, RateLimiter};
pub use observers::{GatewayObserver, ObserverSet, Subscription};
pub use outbound::OutboundChannel;
pub use pipeline::CallPipeline;
pub use session::SessionProbe;
