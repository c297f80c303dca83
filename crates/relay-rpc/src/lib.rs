//! # relay-rpc
//!
//! Wire-format types and error taxonomy for the relay gateway.
//!
//! - Request/response envelopes exchanged over a persistent connection
//! - Server-pushed event envelope
//! - The structured error taxonomy produced by the gateway pipeline

#![deny(unsafe_code)]

pub mod errors;
pub mod types;

pub use errors::RpcError;
pub use types::{RpcErrorBody, RpcEvent, RpcRequest, RpcResponse};
