//! Client identity resolution.
//!
//! A connection's transport layer attaches a [`ConnectionRequest`]
//! (principal, session id, declared headers). Resolution collapses that
//! into the logical [`ClientIdentity`] owning the connection, so
//! client-scoped state is shared across reconnects and multiple
//! devices. Resolution is pure and always succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::access::AccessGuard;

/// Sentinel id shared by all unauthenticated, sessionless clients.
pub const ANONYMOUS_ID: &str = "anonymous";

/// Prefix for session-derived client ids.
pub const SESSION_ID_PREFIX: &str = "session-";

/// How strongly the client is identified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    /// Authenticated user.
    User,
    /// Anonymous session with a stable session id.
    Session,
    /// No identifying information at all.
    Anonymous,
}

impl AuthLevel {
    /// Stable lowercase name, used as a span field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Session => "session",
            Self::Anonymous => "anonymous",
        }
    }
}

/// Authenticated principal attached by the transport's auth layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Stable user id.
    pub user_id: String,
    /// Display name, if known.
    pub display_name: Option<String>,
}

impl Principal {
    /// Create a principal with just a user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }
}

/// Request context the transport attaches to an inbound connection.
///
/// Everything here is produced by external collaborators (session
/// cookie parsing, token validation); the gateway only reads it.
#[derive(Clone, Default)]
pub struct ConnectionRequest {
    /// Authenticated principal, if any.
    pub principal: Option<Principal>,
    /// Transport session id, if any.
    pub session_id: Option<String>,
    /// Declared client kind (e.g. `"cli"`, `"web"`); observability only.
    pub client_kind: Option<String>,
    /// Originating address, if known.
    pub remote_addr: Option<String>,
    /// Client-supplied headers of interest.
    pub headers: HashMap<String, String>,
    /// Pre-resolved access guard overriding the gateway's policy.
    pub access_override: Option<Arc<dyn AccessGuard>>,
}

impl std::fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("principal", &self.principal)
            .field("session_id", &self.session_id)
            .field("client_kind", &self.client_kind)
            .field("remote_addr", &self.remote_addr)
            .field("headers", &self.headers)
            .field("access_override", &self.access_override.is_some())
            .finish()
    }
}

/// The logical owner of one or more simultaneous connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    /// Deterministic client id: user id, `session-{id}`, or `anonymous`.
    pub id: String,
    /// How this identity was established.
    pub auth_level: AuthLevel,
    /// Underlying user id when authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Underlying session id when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Declared client kind; never affects `id` or authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_category: Option<String>,
}

impl ClientIdentity {
    /// Resolve the identity owning a connection.
    ///
    /// Resolution order: authenticated user, then session, then the
    /// anonymous sentinel. Two connections carrying the same user or
    /// session always resolve to the same `id`.
    pub fn resolve(request: &ConnectionRequest) -> Self {
        let (id, auth_level, user_id) = match (&request.principal, &request.session_id) {
            (Some(principal), _) => (
                principal.user_id.clone(),
                AuthLevel::User,
                Some(principal.user_id.clone()),
            ),
            (None, Some(session_id)) => (
                format!("{SESSION_ID_PREFIX}{session_id}"),
                AuthLevel::Session,
                None,
            ),
            (None, None) => (ANONYMOUS_ID.to_owned(), AuthLevel::Anonymous, None),
        };
        Self {
            id,
            auth_level,
            user_id,
            session_id: request.session_id.clone(),
            client_category: request.client_kind.clone(),
        }
    }

    /// Identity class used as a metrics label.
    ///
    /// Concrete user ids are kept; session and anonymous clients
    /// collapse into one `anonymous` bucket so raw session ids never
    /// blow up label cardinality.
    pub fn metrics_class(&self) -> &str {
        match self.auth_level {
            AuthLevel::User => &self.id,
            AuthLevel::Session | AuthLevel::Anonymous => ANONYMOUS_ID,
        }
    }
}
