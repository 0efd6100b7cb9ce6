//! # Waypoint Core
//!
//! Request orchestration and session logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - The request orchestrator and its builder
//! - The token refresh coordinator (FIFO lock, attempt ledger)
//! - The interceptor chain and built-in observability hooks
//! - Port interfaces (traits) for transport, credential storage and the
//!   token authority
//!
//! ## Architecture Principles
//! - Only depends on `waypoint-common` and `waypoint-domain`
//! - No HTTP client, keychain or filesystem code
//! - All external dependencies via traits

pub mod auth;
pub mod interceptors;
pub mod metrics;
pub mod pipeline;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use auth::{CredentialStore, RemoteAuthority, TokenRefreshCoordinator};
pub use interceptors::{
    ErrorInterceptor, HookError, InterceptorChain, RequestContext, RequestInterceptor,
    ResponseInterceptor,
};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{RequestPipeline, RequestPipelineBuilder, Transport};
