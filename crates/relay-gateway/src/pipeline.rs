//! Call interceptor pipeline.
//!
//! Every inbound call on a connection runs the same fixed stage order:
//! metrics (pre), trace span, rate limiting, authorization, session
//! touch, dispatch, metrics (post). A stage failure short-circuits the
//! rest, terminates that call only, and never tears down the
//! connection or sibling calls. Concurrent calls on one connection
//! interleave freely; each call's own stage order is strict and its
//! span closes only after its own dispatch completes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{Instrument, debug, error, warn};

use relay_rpc::{RpcError, RpcRequest, RpcResponse};

use crate::access::AccessGuard;
use crate::endpoint::Endpoint;
use crate::identity::ClientIdentity;
use crate::limiter::{RateDecision, RateLimiter};
use crate::metrics::{RPC_CALL_DURATION_SECONDS, RPC_CALLS_TOTAL, RPC_ERRORS_TOTAL};
use crate::rpc::context::CallContext;
use crate::session::SessionProbe;

/// Placeholder id echoed when a request carries none.
const UNKNOWN_ID: &str = "unknown";

/// Call-dispatch function bound to one connection.
///
/// Holds the resolved identity, the connection's endpoint, the
/// client-scoped rate limiter, and the access guard; applies the
/// interceptor stages to every call.
pub struct CallPipeline {
    identity: ClientIdentity,
    endpoint: Arc<dyn Endpoint>,
    limiter: Arc<dyn RateLimiter>,
    guard: Arc<dyn AccessGuard>,
    probe: Arc<dyn SessionProbe>,
    dispatch_timeout: Duration,
}

impl CallPipeline {
    /// Build a pipeline for one connection.
    pub fn new(
        identity: ClientIdentity,
        endpoint: Arc<dyn Endpoint>,
        limiter: Arc<dyn RateLimiter>,
        guard: Arc<dyn AccessGuard>,
        probe: Arc<dyn SessionProbe>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            endpoint,
            limiter,
            guard,
            probe,
            dispatch_timeout,
        }
    }

    /// Handle one inbound call end to end.
    ///
    /// Always produces exactly one response; one-way notifications are
    /// rejected because that guarantee cannot hold for them.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let method = request.method.clone();
        counter!(
            RPC_CALLS_TOTAL,
            "method" => method.clone(),
            "client" => self.identity.metrics_class().to_owned()
        )
        .increment(1);

        let Some(id) = request.id.clone() else {
            let err = RpcError::InvalidRequest {
                message: "notifications are not supported; every call receives a reply".into(),
            };
            counter!(
                RPC_ERRORS_TOTAL,
                "method" => method.clone(),
                "error_type" => err.code().to_owned()
            )
            .increment(1);
            warn!(method, "rejected one-way notification");
            return RpcResponse::from_error(UNKNOWN_ID, &err);
        };

        let span = tracing::info_span!(
            "rpc_call",
            client_id = %self.identity.id,
            auth_level = self.identity.auth_level.as_str(),
            client_category = self.identity.client_category.as_deref().unwrap_or(""),
            method = %method,
            status = tracing::field::Empty,
        );

        let start = Instant::now();
        let result = self
            .run_stages(&method, request.params)
            .instrument(span.clone())
            .await;

        let status: u64 = match &result {
            Ok(_) => 200,
            Err(err) => u64::from(err.status()),
        };
        span.record("status", status);

        let duration = start.elapsed();
        histogram!(RPC_CALL_DURATION_SECONDS, "method" => method.clone())
            .record(duration.as_secs_f64());
        if duration.as_secs() >= 5 {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC call");
        }

        match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(err) => {
                counter!(
                    RPC_ERRORS_TOTAL,
                    "method" => method,
                    "error_type" => err.code().to_owned()
                )
                .increment(1);
                RpcResponse::from_error(id, &err)
            }
        }
    }

    /// Stages between span open and span close, in fixed order.
    async fn run_stages(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        // Rate limiting, per client id (shared across the identity's
        // connections). A limiter malfunction is an anomaly, not a
        // quota rejection.
        match self.limiter.consume(&self.identity.id, method).await {
            Ok(RateDecision::Allowed) => {}
            Ok(RateDecision::Limited { retry_after }) => {
                debug!(method, client_id = %self.identity.id, "call rate limited");
                return Err(RpcError::RateLimited {
                    retry_after_secs: round_retry_after(retry_after),
                });
            }
            Err(fault) => {
                error!(method, client_id = %self.identity.id, error = %fault, "rate limiter malfunction");
                return Err(RpcError::Internal {
                    message: format!("rate limiter fault: {fault}"),
                });
            }
        }

        // Authorization, checked on every call; per-call resource state
        // may change the decision, so it is never cached.
        if !self.guard.can_access(method) {
            debug!(method, client_id = %self.identity.id, "call denied");
            return Err(RpcError::PermissionDenied {
                method: method.to_owned(),
            });
        }

        // Session liveness: a dispatched call is proof of activity.
        if let Some(session_id) = &self.identity.session_id {
            self.probe.touch(session_id);
        }

        // Dispatch through the typed method table.
        let Some(handler) = self.endpoint.registry().get(method) else {
            return Err(RpcError::MethodNotFound {
                method: method.to_owned(),
            });
        };
        let ctx = CallContext::new(method, self.identity.clone());
        let call = AssertUnwindSafe(handler.handle(params, &ctx)).catch_unwind();
        match tokio::time::timeout(self.dispatch_timeout, call).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => {
                if let RpcError::Internal { message } = &err {
                    error!(method, error = message, "handler internal error");
                }
                Err(err)
            }
            Ok(Err(panic)) => {
                let detail = panic_message(panic.as_ref());
                error!(method, panic = %detail, "handler panicked");
                Err(RpcError::Internal {
                    message: format!("handler for '{method}' panicked: {detail}"),
                })
            }
            Err(_elapsed) => {
                error!(method, timeout = ?self.dispatch_timeout, "handler timed out");
                Err(RpcError::Internal {
                    message: format!("handler for '{method}' timed out"),
                })
            }
        }
    }
}

/// Round a retry-after duration to whole seconds, minimum 1.
fn round_retry_after(retry_after: Duration) -> u64 {
    let secs = if retry_after.subsec_millis() >= 500 {
        retry_after.as_secs() + 1
    } else {
        retry_after.as_secs()
    };
    secs.max(1)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::access::{AllowAll, DenyAll};
    use crate::identity::{ConnectionRequest, Principal};
    use crate::rpc::registry::{MethodHandler, MethodRegistry};
    use crate::session::NoopSessionProbe;

    // ── Test doubles ────────────────────────────────────────────────

    struct TestEndpoint {
        registry: MethodRegistry,
    }

    impl Endpoint for TestEndpoint {
        fn registry(&self) -> &MethodRegistry {
            &self.registry
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(
            &self,
            params: Option<Value>,
            _ctx: &CallContext,
        ) -> Result<Value, RpcError> {
            Ok(params.unwrap_or(json!(null)))
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl MethodHandler for CountingHandler {
        async fn handle(
            &self,
            _params: Option<Value>,
            _ctx: &CallContext,
        ) -> Result<Value, RpcError> {
            let _ = self.0.fetch_add(1, Ordering::Relaxed);
            Ok(json!("dispatched"))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl MethodHandler for PanicHandler {
        async fn handle(
            &self,
            _params: Option<Value>,
            _ctx: &CallContext,
        ) -> Result<Value, RpcError> {
            panic!("simulated handler fault");
        }
    }

    struct AppErrorHandler;

    #[async_trait]
    impl MethodHandler for AppErrorHandler {
        async fn handle(
            &self,
            _params: Option<Value>,
            _ctx: &CallContext,
        ) -> Result<Value, RpcError> {
            Err(RpcError::Application {
                code: "WORKSPACE_ARCHIVED".into(),
                message: "workspace is archived".into(),
                details: Some(json!({"workspaceId": "w1"})),
            })
        }
    }

    struct AllowLimiter;

    #[async_trait]
    impl RateLimiter for AllowLimiter {
        async fn consume(&self, _client_id: &str, _method: &str) -> anyhow::Result<RateDecision> {
            Ok(RateDecision::Allowed)
        }
    }

    struct LimitedLimiter(Duration);

    #[async_trait]
    impl RateLimiter for LimitedLimiter {
        async fn consume(&self, _client_id: &str, _method: &str) -> anyhow::Result<RateDecision> {
            Ok(RateDecision::Limited {
                retry_after: self.0,
            })
        }
    }

    struct FaultyLimiter;

    #[async_trait]
    impl RateLimiter for FaultyLimiter {
        async fn consume(&self, _client_id: &str, _method: &str) -> anyhow::Result<RateDecision> {
            Err(anyhow::anyhow!("limiter backend unreachable"))
        }
    }

    struct RecordingLimiter(Arc<AtomicUsize>);

    #[async_trait]
    impl RateLimiter for RecordingLimiter {
        async fn consume(&self, _client_id: &str, _method: &str) -> anyhow::Result<RateDecision> {
            let _ = self.0.fetch_add(1, Ordering::Relaxed);
            Ok(RateDecision::Allowed)
        }
    }

    struct TouchCounter(Arc<AtomicUsize>);

    impl SessionProbe for TouchCounter {
        fn touch(&self, _session_id: &str) {
            let _ = self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn user_identity(user: &str) -> ClientIdentity {
        ClientIdentity::resolve(&ConnectionRequest {
            principal: Some(Principal::new(user)),
            ..Default::default()
        })
    }

    fn echo_endpoint() -> Arc<dyn Endpoint> {
        let mut registry = MethodRegistry::new();
        registry.register("echo", EchoHandler);
        Arc::new(TestEndpoint { registry })
    }

    fn pipeline_with(
        endpoint: Arc<dyn Endpoint>,
        limiter: Arc<dyn RateLimiter>,
        guard: Arc<dyn AccessGuard>,
    ) -> CallPipeline {
        CallPipeline::new(
            user_identity("u1"),
            endpoint,
            limiter,
            guard,
            Arc::new(NoopSessionProbe),
            Duration::from_secs(60),
        )
    }

    fn call(id: &str, method: &str, params: Option<Value>) -> RpcRequest {
        RpcRequest::call(id, method, params)
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn successful_call_returns_handler_value_unwrapped() {
        let pipeline = pipeline_with(echo_endpoint(), Arc::new(AllowLimiter), Arc::new(AllowAll));
        let resp = pipeline
            .handle(call("r1", "echo", Some(json!({"x": 1}))))
            .await;
        assert!(resp.success);
        assert_eq!(resp.id, "r1");
        assert_eq!(resp.result.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn rate_limited_call_never_dispatches() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let mut registry = MethodRegistry::new();
        registry.register("workspace.get", CountingHandler(dispatched.clone()));
        let pipeline = pipeline_with(
            Arc::new(TestEndpoint { registry }),
            Arc::new(LimitedLimiter(Duration::from_secs(12))),
            Arc::new(AllowAll),
        );

        let resp = pipeline.handle(call("r1", "workspace.get", None)).await;
        assert!(!resp.success);
        let err = resp.error.unwrap();
        assert_eq!(err.code, "RATE_LIMITED");
        assert_eq!(err.details.unwrap()["retryAfterSeconds"], 12);
        assert_eq!(dispatched.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn retry_after_is_at_least_one_second() {
        let pipeline = pipeline_with(
            echo_endpoint(),
            Arc::new(LimitedLimiter(Duration::from_millis(80))),
            Arc::new(AllowAll),
        );
        let resp = pipeline.handle(call("r1", "echo", None)).await;
        let details = resp.error.unwrap().details.unwrap();
        assert_eq!(details["retryAfterSeconds"], 1);
    }

    #[test]
    fn retry_after_rounds_to_nearest_second() {
        assert_eq!(round_retry_after(Duration::from_millis(1400)), 1);
        assert_eq!(round_retry_after(Duration::from_millis(1600)), 2);
        assert_eq!(round_retry_after(Duration::from_millis(10)), 1);
        assert_eq!(round_retry_after(Duration::from_secs(30)), 30);
    }

    #[tokio::test]
    async fn limiter_fault_is_internal_not_rate_limited() {
        let pipeline = pipeline_with(echo_endpoint(), Arc::new(FaultyLimiter), Arc::new(AllowAll));
        let resp = pipeline.handle(call("r1", "echo", None)).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, "INTERNAL_ERROR");
        assert!(!err.message.contains("unreachable"));
    }

    #[tokio::test]
    async fn denied_call_never_dispatches() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let mut registry = MethodRegistry::new();
        registry.register("workspace.get", CountingHandler(dispatched.clone()));
        let pipeline = pipeline_with(
            Arc::new(TestEndpoint { registry }),
            Arc::new(AllowLimiter),
            Arc::new(DenyAll),
        );

        let resp = pipeline.handle(call("r1", "workspace.get", None)).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, "PERMISSION_DENIED");
        assert!(err.message.contains("workspace.get"));
        assert_eq!(dispatched.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn rate_limit_runs_before_authorization() {
        // A limited call on a denied method reports RATE_LIMITED, not
        // PERMISSION_DENIED.
        let pipeline = pipeline_with(
            echo_endpoint(),
            Arc::new(LimitedLimiter(Duration::from_secs(1))),
            Arc::new(DenyAll),
        );
        let resp = pipeline.handle(call("r1", "echo", None)).await;
        assert_eq!(resp.error.unwrap().code, "RATE_LIMITED");
    }

    #[tokio::test]
    async fn denied_call_still_consumes_quota() {
        let consumed = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(
            echo_endpoint(),
            Arc::new(RecordingLimiter(consumed.clone())),
            Arc::new(DenyAll),
        );
        let _ = pipeline.handle(call("r1", "echo", None)).await;
        assert_eq!(consumed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_method_is_explicit_error() {
        let pipeline = pipeline_with(echo_endpoint(), Arc::new(AllowLimiter), Arc::new(AllowAll));
        let resp = pipeline.handle(call("r1", "no.such", None)).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, "METHOD_NOT_FOUND");
        assert!(err.message.contains("no.such"));
    }

    #[tokio::test]
    async fn application_error_passes_through_verbatim() {
        let mut registry = MethodRegistry::new();
        registry.register("workspace.get", AppErrorHandler);
        let pipeline = pipeline_with(
            Arc::new(TestEndpoint { registry }),
            Arc::new(AllowLimiter),
            Arc::new(AllowAll),
        );

        let resp = pipeline.handle(call("r1", "workspace.get", None)).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, "WORKSPACE_ARCHIVED");
        assert_eq!(err.message, "workspace is archived");
        assert_eq!(err.details.unwrap()["workspaceId"], "w1");
    }

    #[tokio::test]
    async fn handler_panic_is_reported_as_opaque_internal() {
        let mut registry = MethodRegistry::new();
        registry.register("boom", PanicHandler);
        let pipeline = pipeline_with(
            Arc::new(TestEndpoint { registry }),
            Arc::new(AllowLimiter),
            Arc::new(AllowAll),
        );

        let resp = pipeline.handle(call("r1", "boom", None)).await;
        assert!(!resp.success);
        let err = resp.error.unwrap();
        assert_eq!(err.code, "INTERNAL_ERROR");
        assert_eq!(err.message, "internal server error");
        assert!(!err.message.contains("simulated"));
    }

    #[tokio::test]
    async fn notification_is_rejected_without_dispatch() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let mut registry = MethodRegistry::new();
        registry.register("echo", CountingHandler(dispatched.clone()));
        let pipeline = pipeline_with(
            Arc::new(TestEndpoint { registry }),
            Arc::new(AllowLimiter),
            Arc::new(AllowAll),
        );

        let resp = pipeline
            .handle(RpcRequest {
                id: None,
                method: "echo".into(),
                params: None,
            })
            .await;
        assert!(!resp.success);
        assert_eq!(resp.id, "unknown");
        assert_eq!(resp.error.unwrap().code, "INVALID_REQUEST");
        assert_eq!(dispatched.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn session_touched_once_per_dispatched_call() {
        let touches = Arc::new(AtomicUsize::new(0));
        let identity = ClientIdentity::resolve(&ConnectionRequest {
            session_id: Some("s1".into()),
            ..Default::default()
        });
        let pipeline = CallPipeline::new(
            identity,
            echo_endpoint(),
            Arc::new(AllowLimiter),
            Arc::new(AllowAll),
            Arc::new(TouchCounter(touches.clone())),
            Duration::from_secs(60),
        );

        let _ = pipeline.handle(call("r1", "echo", None)).await;
        let _ = pipeline.handle(call("r2", "echo", None)).await;
        assert_eq!(touches.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn session_not_touched_when_rate_limited() {
        let touches = Arc::new(AtomicUsize::new(0));
        let identity = ClientIdentity::resolve(&ConnectionRequest {
            session_id: Some("s1".into()),
            ..Default::default()
        });
        let pipeline = CallPipeline::new(
            identity,
            echo_endpoint(),
            Arc::new(LimitedLimiter(Duration::from_secs(1))),
            Arc::new(AllowAll),
            Arc::new(TouchCounter(touches.clone())),
            Duration::from_secs(60),
        );

        let _ = pipeline.handle(call("r1", "echo", None)).await;
        assert_eq!(touches.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn dispatch_timeout_is_internal_error() {
        struct SlowHandler;

        #[async_trait]
        impl MethodHandler for SlowHandler {
            async fn handle(
                &self,
                _params: Option<Value>,
                _ctx: &CallContext,
            ) -> Result<Value, RpcError> {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(json!("done"))
            }
        }

        tokio::time::pause();
        let mut registry = MethodRegistry::new();
        registry.register("slow", SlowHandler);
        let pipeline = pipeline_with(
            Arc::new(TestEndpoint { registry }),
            Arc::new(AllowLimiter),
            Arc::new(AllowAll),
        );

        let resp = pipeline.handle(call("r1", "slow", None)).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().code, "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn failure_terminates_that_call_only() {
        let mut registry = MethodRegistry::new();
        registry.register("boom", PanicHandler);
        registry.register("echo", EchoHandler);
        let pipeline = pipeline_with(
            Arc::new(TestEndpoint { registry }),
            Arc::new(AllowLimiter),
            Arc::new(AllowAll),
        );

        let failed = pipeline.handle(call("r1", "boom", None)).await;
        assert!(!failed.success);
        let ok = pipeline.handle(call("r2", "echo", Some(json!(7)))).await;
        assert!(ok.success);
        assert_eq!(ok.result.unwrap(), 7);
    }

    #[tokio::test]
    async fn concurrent_calls_interleave() {
        let pipeline = Arc::new(pipeline_with(
            echo_endpoint(),
            Arc::new(AllowLimiter),
            Arc::new(AllowAll),
        ));
        let a = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.handle(call("a", "echo", Some(json!(1)))).await })
        };
        let b = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.handle(call("b", "echo", Some(json!(2)))).await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.id, "a");
        assert_eq!(a.result.unwrap(), 1);
        assert_eq!(b.id, "b");
        assert_eq!(b.result.unwrap(), 2);
    }
}
