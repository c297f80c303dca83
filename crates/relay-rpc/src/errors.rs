//! RPC error codes and error type.

use serde_json::json;

use crate::types::RpcErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Per-client quota exhausted; the caller should retry later.
pub const RATE_LIMITED: &str = "RATE_LIMITED";
/// The caller is not allowed to invoke this method.
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Malformed envelope, including one-way notifications.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// RPC error produced by the gateway pipeline or raised by a handler.
///
/// `Application` is the escape hatch for handler-defined structured
/// failures; it is passed through to the caller verbatim. `Internal`
/// keeps its message server-side only.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Per-client quota rejected this call.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Whole seconds until the quota window refills (always >= 1).
        retry_after_secs: u64,
    },

    /// Authorization refused this call.
    #[error("access to '{method}' denied")]
    PermissionDenied {
        /// The method that was refused.
        method: String,
    },

    /// No handler registered under this name.
    #[error("method '{method}' not found")]
    MethodNotFound {
        /// The unknown method name.
        method: String,
    },

    /// Envelope is not a well-formed call.
    #[error("{message}")]
    InvalidRequest {
        /// Description of what is wrong.
        message: String,
    },

    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Handler-defined structured failure, passed through unchanged.
    #[error("{message}")]
    Application {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<serde_json::Value>,
    },

    /// Unexpected fault. The message is for server-side logs; the wire
    /// body never carries it.
    #[error("{message}")]
    Internal {
        /// Full server-side description.
        message: String,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::RateLimited { .. } => RATE_LIMITED,
            Self::PermissionDenied { .. } => PERMISSION_DENIED,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Application { code, .. } => code,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Numeric status recorded in metrics (HTTP-style).
    pub fn status(&self) -> u16 {
        match self {
            Self::RateLimited { .. } => 429,
            Self::PermissionDenied { .. } => 403,
            Self::MethodNotFound { .. } => 404,
            Self::InvalidRequest { .. } | Self::InvalidParams { .. } => 400,
            Self::Application { .. } => 422,
            Self::Internal { .. } => 500,
        }
    }

    /// Convert to the wire-format error body.
    ///
    /// `Internal` produces a generic, detail-free body; everything the
    /// server knows about the fault stays in the logs.
    pub fn to_error_body(&self) -> RpcErrorBody {
        match self {
            Self::Internal { .. } => RpcErrorBody {
                code: INTERNAL_ERROR.to_owned(),
                message: "internal server error".to_owned(),
                details: None,
            },
            Self::RateLimited { retry_after_secs } => RpcErrorBody {
                code: RATE_LIMITED.to_owned(),
                message: self.to_string(),
                details: Some(json!({ "retryAfterSeconds": retry_after_secs })),
            },
            Self::Application { code, details, .. } => RpcErrorBody {
                code: code.clone(),
                message: self.to_string(),
                details: details.clone(),
            },
            _ => RpcErrorBody {
                code: self.code().to_owned(),
                message: self.to_string(),
                details: None,
            },
        }
    }
}
