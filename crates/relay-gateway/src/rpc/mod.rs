//! Typed method dispatch: handler trait, registry, per-call context.

pub mod context;
pub mod registry;

pub use context::CallContext;
pub use registry::{MethodHandler, MethodRegistry};
