//! Hooks invoked around every transport attempt
//!
//! Three ordered lists run at fixed points: before a request is sent, after a
//! response arrives, and when a call is about to surface an error. A hook
//! that fails is logged and skipped; the chain carries on with the last good
//! value. Hooks exist for observability and must not be relied on for
//! correctness.

pub mod builtin;
pub mod chain;

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;
use waypoint_domain::{HttpMethod, PipelineError, TransportResponse};

pub use builtin::{ElapsedInterceptor, ErrorRecorder, FailureRecord, TimestampInterceptor};
pub use chain::InterceptorChain;

/// Failure inside a hook; logged, never surfaced to callers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Per-attempt view of a request, threaded through all three phases
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub method: HttpMethod,
    pub url: String,
    /// Backoff retry count for this call
    pub attempt: u32,
    /// Transport attempts so far for this call, including this one
    pub depth: u32,
    /// Outgoing headers; credentials are attached after the request phase
    pub headers: BTreeMap<String, String>,
    /// Set by [`TimestampInterceptor`]
    pub started_at: Option<Instant>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn new(method: HttpMethod, url: impl Into<String>, attempt: u32, depth: u32) -> Self {
        Self {
            method,
            url: url.into(),
            attempt,
            depth,
            headers: BTreeMap::new(),
            started_at: None,
            sent_at: None,
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Request-phase hook
pub trait RequestInterceptor: Send + Sync {
    fn on_request(&self, request: RequestContext) -> Result<RequestContext, HookError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Response-phase hook; sees every response, successful or not
pub trait ResponseInterceptor: Send + Sync {
    fn on_response(
        &self,
        request: &RequestContext,
        response: TransportResponse,
    ) -> Result<TransportResponse, HookError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Error-phase hook; runs once per terminal failure
pub trait ErrorInterceptor: Send + Sync {
    fn on_error(
        &self,
        request: &RequestContext,
        error: PipelineError,
    ) -> Result<PipelineError, HookError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> RequestInterceptor for F
where
    F: Fn(RequestContext) -> Result<RequestContext, HookError> + Send + Sync,
{
    fn on_request(&self, request: RequestContext) -> Result<RequestContext, HookError> {
        self(request)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(&RequestContext, TransportResponse) -> Result<TransportResponse, HookError>
        + Send
        + Sync,
{
    fn on_response(
        &self,
        request: &RequestContext,
        response: TransportResponse,
    ) -> Result<TransportResponse, HookError> {
        self(request, response)
    }
}

impl<F> ErrorInterceptor for F
where
    F: Fn(&RequestContext, PipelineError) -> Result<PipelineError, HookError> + Send + Sync,
{
    fn on_error(
        &self,
        request: &RequestContext,
        error: PipelineError,
    ) -> Result<PipelineError, HookError> {
        self(request, error)
    }
}
