//! Construction of a [`RequestPipeline`]

use std::sync::Arc;

use tracing::debug;
use waypoint_common::cache::{ResponseCache, ResponseCacheConfig};
use waypoint_common::resilience::{BackoffScheduler, Clock, SystemClock};
use waypoint_common::sync::InFlightRegistry;
use waypoint_domain::{PipelineConfig, PipelineError, Result};

use super::ports::Transport;
use super::service::RequestPipeline;
use crate::auth::{CredentialStore, RemoteAuthority, TokenRefreshCoordinator};
use crate::interceptors::{ElapsedInterceptor, ErrorRecorder, InterceptorChain, TimestampInterceptor};
use crate::metrics::PipelineMetrics;

/// Builder for [`RequestPipeline`]
///
/// # Example
/// ```no_run
/// # use std::sync::Arc;
/// # use waypoint_core::{CredentialStore, RemoteAuthority, RequestPipeline, Transport};
/// # fn wire(
/// #     transport: Arc<dyn Transport>,
/// #     store: Arc<dyn CredentialStore>,
/// #     authority: Arc<dyn RemoteAuthority>,
/// # ) -> waypoint_domain::Result<()> {
/// let pipeline = RequestPipeline::builder(transport, store, authority)
///     .base_url("https://api.example.com")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RequestPipelineBuilder<C: Clock + Clone = SystemClock> {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    authority: Arc<dyn RemoteAuthority>,
    config: PipelineConfig,
    base_url: Option<String>,
    backoff: Option<BackoffScheduler>,
    clock: C,
    default_interceptors: bool,
    sweeper: bool,
}

impl RequestPipelineBuilder<SystemClock> {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn RemoteAuthority>,
    ) -> Self {
        Self {
            transport,
            store,
            authority,
            config: PipelineConfig::default(),
            base_url: None,
            backoff: None,
            clock: SystemClock,
            default_interceptors: true,
            sweeper: true,
        }
    }
}

impl<C: Clock + Clone> RequestPipelineBuilder<C> {
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Prefix for relative URLs passed to `call`
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Replace the scheduler derived from the config (e.g. a seeded one)
    #[must_use]
    pub fn backoff(mut self, scheduler: BackoffScheduler) -> Self {
        self.backoff = Some(scheduler);
        self
    }

    /// Skip the timestamp, elapsed and error-recorder hooks
    #[must_use]
    pub fn without_default_interceptors(mut self) -> Self {
        self.default_interceptors = false;
        self
    }

    /// Do not start the background cache sweeper
    #[must_use]
    pub fn without_sweeper(mut self) -> Self {
        self.sweeper = false;
        self
    }

    /// Use a different time source for cache expiry and the refresh window
    pub fn clock<C2: Clock + Clone>(self, clock: C2) -> RequestPipelineBuilder<C2> {
        RequestPipelineBuilder {
            transport: self.transport,
            store: self.store,
            authority: self.authority,
            config: self.config,
            base_url: self.base_url,
            backoff: self.backoff,
            clock,
            default_interceptors: self.default_interceptors,
            sweeper: self.sweeper,
        }
    }

    /// Validate the configuration and assemble the pipeline
    ///
    /// The cache sweeper is only started when called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns a `Configuration` error when the config is invalid.
    pub fn build(self) -> Result<RequestPipeline<C>> {
        self.config
            .validate()
            .map_err(|reason| PipelineError::configuration("pipeline", reason))?;

        let metrics = Arc::new(PipelineMetrics::new());
        let cache = Arc::new(ResponseCache::with_clock(
            ResponseCacheConfig::from(&self.config),
            self.clock.clone(),
        ));

        let sweeper = if self.sweeper && tokio::runtime::Handle::try_current().is_ok() {
            Some(cache.spawn_sweeper(self.config.cache_sweep_interval))
        } else {
            debug!("response cache sweeper not started");
            None
        };

        let coordinator = TokenRefreshCoordinator::with_clock(
            Arc::clone(&self.store),
            self.authority,
            &self.config,
            self.clock,
        )
        .with_metrics(Arc::clone(&metrics));

        let interceptors = InterceptorChain::new();
        let error_recorder = if self.default_interceptors {
            let recorder = Arc::new(ErrorRecorder::new(Arc::clone(&metrics)));
            interceptors.push_request(Arc::new(TimestampInterceptor));
            interceptors.push_response(Arc::new(ElapsedInterceptor::new(Arc::clone(&metrics))));
            interceptors.push_error(recorder.clone());
            Some(recorder)
        } else {
            None
        };

        let backoff = self.backoff.unwrap_or_else(|| BackoffScheduler::from_config(&self.config));

        Ok(RequestPipeline {
            base_url: self.base_url.map(|url| url.trim_end_matches('/').to_string()),
            transport: self.transport,
            store: self.store,
            coordinator,
            cache,
            registry: InFlightRegistry::new(),
            backoff,
            interceptors,
            metrics,
            error_recorder,
            _sweeper: sweeper,
            config: self.config,
        })
    }
}
