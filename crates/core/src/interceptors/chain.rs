//! Ordered, fault-isolated hook lists

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;
use waypoint_domain::{PipelineError, TransportResponse};

use super::{
    ErrorInterceptor, HookError, RequestContext, RequestInterceptor, ResponseInterceptor,
};

/// Registered hooks, run in registration order
///
/// Hooks can be added while the pipeline is serving calls; a call in progress
/// sees the list as it was when each phase started.
#[derive(Default)]
pub struct InterceptorChain {
    request: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
    response: RwLock<Vec<Arc<dyn ResponseInterceptor>>>,
    error: RwLock<Vec<Arc<dyn ErrorInterceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request-phase closure
    pub fn on_request<F>(&self, hook: F)
    where
        F: Fn(RequestContext) -> Result<RequestContext, HookError> + Send + Sync + 'static,
    {
        self.push_request(Arc::new(hook));
    }

    /// Register a response-phase closure
    pub fn on_response<F>(&self, hook: F)
    where
        F: Fn(&RequestContext, TransportResponse) -> Result<TransportResponse, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.push_response(Arc::new(hook));
    }

    /// Register an error-phase closure
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&RequestContext, PipelineError) -> Result<PipelineError, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.push_error(Arc::new(hook));
    }

    pub fn push_request(&self, hook: Arc<dyn RequestInterceptor>) {
        self.request.write().push(hook);
    }

    pub fn push_response(&self, hook: Arc<dyn ResponseInterceptor>) {
        self.response.write().push(hook);
    }

    pub fn push_error(&self, hook: Arc<dyn ErrorInterceptor>) {
        self.error.write().push(hook);
    }

    /// Number of hooks per phase: (request, response, error)
    pub fn len(&self) -> (usize, usize, usize) {
        (self.request.read().len(), self.response.read().len(), self.error.read().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0, 0)
    }

    pub fn run_request(&self, request: RequestContext) -> RequestContext {
        let hooks = self.request.read().clone();
        let mut current = request;
        for hook in hooks {
            if let Some(next) = isolate("request", hook.name(), || hook.on_request(current.clone())) {
                current = next;
            }
        }
        current
    }

    pub fn run_response(&self, request: &RequestContext, response: TransportResponse) -> TransportResponse {
        let hooks = self.response.read().clone();
        let mut current = response;
        for hook in hooks {
            if let Some(next) = isolate("response", hook.name(), || hook.on_response(request, current.clone())) {
                current = next;
            }
        }
        current
    }

    pub fn run_error(&self, request: &RequestContext, error: PipelineError) -> PipelineError {
        let hooks = self.error.read().clone();
        let mut current = error;
        for hook in hooks {
            if let Some(next) = isolate("error", hook.name(), || hook.on_error(request, current.clone())) {
                current = next;
            }
        }
        current
    }
}

/// Run one hook; an `Err` or a panic is logged and yields `None`
fn isolate<T>(phase: &str, hook: &str, run: impl FnOnce() -> Result<T, HookError>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(next)) => Some(next),
        Ok(Err(err)) => {
            warn!(phase, hook, error = %err, "interceptor failed");
            None
        }
        Err(payload) => {
            warn!(phase, hook, panic = %panic_message(payload.as_ref()), "interceptor panicked");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use waypoint_domain::{ErrorKind, HttpMethod};

    use super::*;

    fn context() -> RequestContext {
        RequestContext::new(HttpMethod::Get, "/profile", 0, 1)
    }

    /// Validates that a failing hook is skipped.
    ///
    /// Assertions:
    /// - Hooks before and after the failing one both apply.
    /// - The failing hook's partial work is discarded.
    #[test]
    fn test_failing_hook_is_skipped() {
        let chain = InterceptorChain::new();
        chain.on_request(|mut ctx| {
            ctx.headers.insert("x-first".to_string(), "1".to_string());
            Ok(ctx)
        });
        chain.on_request(|mut ctx| {
            ctx.headers.insert("x-broken".to_string(), "1".to_string());
            Err(HookError::new("boom"))
        });
        chain.on_request(|mut ctx| {
            ctx.headers.insert("x-third".to_string(), "1".to_string());
            Ok(ctx)
        });

        let out = chain.run_request(context());
        assert!(out.headers.contains_key("x-first"));
        assert!(!out.headers.contains_key("x-broken"));
        assert!(out.headers.contains_key("x-third"));
    }

    #[test]
    fn test_panicking_hooks_are_isolated() {
        let chain = InterceptorChain::new();
        chain.on_request(|_| panic!("request hook bug"));
        chain.on_request(|mut ctx| {
            ctx.headers.insert("x-after".to_string(), "1".to_string());
            Ok(ctx)
        });
        chain.on_response(|_, _| panic!("response hook bug"));
        chain.on_error(|_, _| panic!("error hook bug"));

        let out = chain.run_request(context());
        assert!(out.headers.contains_key("x-after"));

        let response = chain.run_response(&context(), TransportResponse::new(200, "{}"));
        assert_eq!(response.status, 200);

        let error = chain.run_error(&context(), PipelineError::network("/profile", "reset"));
        assert_eq!(error.message, "reset");
    }

    #[test]
    fn test_response_hooks_run_in_order() {
        let chain = InterceptorChain::new();
        chain.on_response(|_, response| Ok(response.with_header("x-order", "a")));
        chain.on_response(|_, response| {
            let seen = response.header("x-order").unwrap_or_default().to_string();
            Ok(response.with_header("x-order", format!("{seen}b")))
        });

        let out = chain.run_response(&context(), TransportResponse::new(200, "{}"));
        assert_eq!(out.header("x-order"), Some("ab"));
    }

    #[test]
    fn test_error_hooks_can_annotate() {
        let chain = InterceptorChain::new();
        chain.on_error(|_, _| Err(HookError::new("recorder offline")));
        chain.on_error(|ctx, mut error| {
            error.message = format!("{} (depth {})", error.message, ctx.depth);
            Ok(error)
        });

        let error = PipelineError::network("/profile", "connection refused");
        let out = chain.run_error(&context(), error);
        assert_eq!(out.kind, ErrorKind::NetworkFailure);
        assert_eq!(out.message, "connection refused (depth 1)");
    }

    #[test]
    fn test_empty_chain_passes_values_through() {
        let chain = InterceptorChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.run_request(context()), context());
    }
}
