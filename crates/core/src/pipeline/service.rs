//! Request orchestrator
//!
//! One call runs as a single state machine:
//!
//! 1. GET calls are answered from the response cache, or joined to an
//!    identical call already in flight
//! 2. credentials are read once and attached as a bearer header
//! 3. each transport attempt passes through the interceptor chain and a
//!    deadline
//! 4. the outcome is classified: success, refresh-and-resend on 401, backoff
//!    retry on transient failures, or a terminal error
//!
//! A single `depth` counter increments on every transport attempt regardless
//! of why it happens and is bounded by `max_depth`. `attempt` counts backoff
//! retries only and is bounded by `max_retries`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use waypoint_common::cache::{resource_path, CacheKey, CacheStats, ResponseCache, SweeperHandle};
use waypoint_common::resilience::{BackoffScheduler, Clock, SystemClock};
use waypoint_common::sync::{InFlightRegistry, Reservation};
use waypoint_domain::constants::AUTHORIZATION_HEADER;
use waypoint_domain::{
    CredentialRecord, ErrorKind, HttpMethod, PipelineConfig, PipelineError, RequestOptions,
    Result, StoreError, TransportError, TransportRequest, TransportResponse,
};

use super::builder::RequestPipelineBuilder;
use super::ports::Transport;
use crate::auth::{CredentialStore, RemoteAuthority, TokenRefreshCoordinator};
use crate::interceptors::{ErrorRecorder, HookError, InterceptorChain, RequestContext};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};

/// Resilient authenticated request pipeline
///
/// Owns the response cache, the in-flight registry and the refresh
/// coordinator; share one instance (behind an `Arc`) across callers.
pub struct RequestPipeline<C: Clock = SystemClock> {
    pub(super) config: PipelineConfig,
    pub(super) base_url: Option<String>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: Arc<dyn CredentialStore>,
    pub(super) coordinator: TokenRefreshCoordinator<C>,
    pub(super) cache: Arc<ResponseCache<Value, C>>,
    pub(super) registry: InFlightRegistry<CacheKey, Value, PipelineError>,
    pub(super) backoff: BackoffScheduler,
    pub(super) interceptors: InterceptorChain,
    pub(super) metrics: Arc<PipelineMetrics>,
    pub(super) error_recorder: Option<Arc<ErrorRecorder>>,
    pub(super) _sweeper: Option<SweeperHandle>,
}

/// How a single transport attempt ended
enum AttemptOutcome {
    Success(Value),
    Unauthorized(TransportResponse),
    Failed { error: PipelineError, retry_after: Option<Duration> },
}

impl RequestPipeline<SystemClock> {
    pub fn builder(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn RemoteAuthority>,
    ) -> RequestPipelineBuilder<SystemClock> {
        RequestPipelineBuilder::new(transport, store, authority)
    }
}

impl<C: Clock> RequestPipeline<C> {
    /// Perform one logical request and return its parsed JSON body
    ///
    /// Empty bodies and 204/205 responses yield `Value::Null`.
    #[instrument(skip(self, options), fields(method = %options.method))]
    pub async fn call(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.metrics.record_call();
        let url = self.resolve_url(url);

        if !options.is_cacheable() {
            return self.execute(&url, &options, None).await;
        }

        let key = CacheKey::derive(
            options.method,
            &url,
            options.body.as_ref(),
            &options.headers,
            &self.config.vary_headers,
        );

        if let Some(hit) = self.cache.get(&key) {
            self.metrics.record_cache_hit();
            debug!(key = %key, "served from cache");
            return Ok(hit);
        }

        match self.registry.reserve(key.clone()) {
            Reservation::Leader(guard) => {
                let outcome = self.execute(&url, &options, Some(&key)).await;
                guard.resolve(outcome.clone());
                outcome
            }
            Reservation::Follower(handle) => {
                self.metrics.record_dedup_join();
                debug!(key = %key, "joining identical in-flight request");
                match handle.wait().await {
                    Some(outcome) => outcome,
                    None => {
                        debug!(key = %key, "in-flight request abandoned; executing independently");
                        self.execute(&url, &options, Some(&key)).await
                    }
                }
            }
        }
    }

    /// `GET url`, deserialized into `T`
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let value = self.call(url, RequestOptions::get()).await?;
        decode(url, value)
    }

    /// `POST url` with a JSON body, deserialized into `T`
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T> {
        let value = self.call(url, RequestOptions::post(encode(url, body)?)).await?;
        decode(url, value)
    }

    /// `PUT url` with a JSON body, deserialized into `T`
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T> {
        let value = self.call(url, RequestOptions::put(encode(url, body)?)).await?;
        decode(url, value)
    }

    /// `PATCH url` with a JSON body, deserialized into `T`
    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T> {
        let value = self.call(url, RequestOptions::patch(encode(url, body)?)).await?;
        decode(url, value)
    }

    /// `DELETE url`, deserialized into `T` (use `()` or `Value` for empty bodies)
    pub async fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let value = self.call(url, RequestOptions::delete()).await?;
        decode(url, value)
    }

    /// Store credentials for a new session and drop cached reads
    ///
    /// # Errors
    /// Returns a `CredentialStore` error when the record cannot be persisted.
    pub async fn sign_in(&self, record: CredentialRecord) -> Result<()> {
        self.store.put(&record).await.map_err(|err| {
            PipelineError::new(ErrorKind::CredentialStore, "sign_in", err.to_string())
        })?;
        self.cache.clear();
        info!(expires_at = %record.expires_at, "signed in");
        Ok(())
    }

    /// End the session
    ///
    /// Clearing stored credentials is best effort; the cache is always cleared.
    pub async fn sign_out(&self) {
        self.coordinator.clear_credentials().await;
        self.cache.clear();
        info!("signed out");
    }

    /// Whether credentials are stored; store failures read as `false`
    pub async fn is_authenticated(&self) -> bool {
        match self.store.get().await {
            Ok(record) => record.is_some(),
            Err(err) => {
                warn!(error = %err, "credential store read failed");
                false
            }
        }
    }

    /// Drop cached reads related to `url`, for out-of-band changes
    ///
    /// Returns how many entries were removed.
    pub fn invalidate(&self, url: &str) -> usize {
        let path = resource_path(&self.resolve_url(url));
        self.cache.invalidate_resource(&path)
    }

    /// Drop cached reads whose key matches `predicate`
    pub fn invalidate_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        self.cache.invalidate_matching(predicate)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Hook registration surface
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    pub fn on_request<F>(&self, hook: F)
    where
        F: Fn(RequestContext) -> std::result::Result<RequestContext, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.interceptors.on_request(hook);
    }

    pub fn on_response<F>(&self, hook: F)
    where
        F: Fn(&RequestContext, TransportResponse) -> std::result::Result<TransportResponse, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.interceptors.on_response(hook);
    }

    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&RequestContext, PipelineError) -> std::result::Result<PipelineError, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.interceptors.on_error(hook);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Failure history kept by the built-in error recorder
    pub fn error_recorder(&self) -> Option<&ErrorRecorder> {
        self.error_recorder.as_deref()
    }

    pub fn coordinator(&self) -> &TokenRefreshCoordinator<C> {
        &self.coordinator
    }

    fn resolve_url(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.starts_with("http://") && !url.starts_with("https://") => {
                format!("{base}/{}", url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }

    async fn execute(
        &self,
        url: &str,
        options: &RequestOptions,
        cache_key: Option<&CacheKey>,
    ) -> Result<Value> {
        let method = options.method;
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let body = match &options.body {
            Some(body) => Some(serde_json::to_vec(body).map_err(|err| {
                PipelineError::configuration(url, format!("request body is not serializable: {err}"))
            })?),
            None => None,
        };

        let mut credentials = match self.store.get().await {
            Ok(record) => record,
            Err(StoreError::Corrupt(reason)) => {
                warn!(url = %url, reason = %reason, "stored credentials are corrupt; signing out");
                self.coordinator.clear_credentials().await;
                None
            }
            Err(err) => {
                let ctx = RequestContext::new(method, url, 0, 0);
                let error = PipelineError::new(ErrorKind::CredentialStore, url, err.to_string());
                return Err(self.fail(&ctx, error));
            }
        };

        let mut attempt = 0u32;
        let mut depth = 0u32;
        let mut refreshed = false;

        loop {
            depth += 1;
            let mut headers = options.headers.clone();
            if body.is_some() {
                headers.entry("content-type".to_string()).or_insert_with(|| "application/json".to_string());
            }
            headers.entry("accept".to_string()).or_insert_with(|| "application/json".to_string());
            let ctx = RequestContext::new(method, url, attempt, depth).with_headers(headers);

            if depth > self.config.max_depth {
                let error = PipelineError::new(
                    ErrorKind::RecursionLimitExceeded,
                    url,
                    format!("exceeded {} transport attempts for one call", self.config.max_depth),
                );
                return Err(self.fail(&ctx, error));
            }

            let ctx = self.interceptors.run_request(ctx);
            let mut headers = ctx.headers.clone();
            if let Some(record) = &credentials {
                headers.insert(AUTHORIZATION_HEADER.to_string(), record.bearer());
            }
            let request = TransportRequest {
                method,
                url: url.to_string(),
                headers,
                body: body.clone(),
                timeout,
            };

            debug!(attempt, depth, "sending request");
            let (error, retry_after) = match self.attempt(&ctx, request, timeout).await {
                AttemptOutcome::Success(value) => {
                    self.after_success(method, url, cache_key, &value);
                    info!(attempt, depth, "request completed");
                    return Ok(value);
                }
                AttemptOutcome::Unauthorized(response) => {
                    match self.recover_session(url, &credentials, refreshed, &response).await {
                        Ok(fresh) => {
                            credentials = Some(fresh);
                            refreshed = true;
                            continue;
                        }
                        Err(error) => return Err(self.fail(&ctx, error)),
                    }
                }
                AttemptOutcome::Failed { error, retry_after } => (error, retry_after),
            };

            if error.is_retryable() && attempt < max_retries {
                let delay = self.retry_delay(attempt, retry_after);
                warn!(
                    attempt,
                    depth,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure; retrying"
                );
                self.metrics.record_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(self.fail(&ctx, error));
        }
    }

    /// One transport exchange under a deadline, classified
    async fn attempt(&self, ctx: &RequestContext, request: TransportRequest, timeout: Duration) -> AttemptOutcome {
        let url = request.url.clone();
        self.metrics.record_transport_attempt();

        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(TransportError::Timeout(after))) => {
                return AttemptOutcome::Failed { error: PipelineError::timeout(&url, after), retry_after: None };
            }
            Ok(Err(TransportError::Network(message))) => {
                return AttemptOutcome::Failed { error: PipelineError::network(&url, message), retry_after: None };
            }
            Ok(Err(TransportError::InvalidRequest(message))) => {
                return AttemptOutcome::Failed { error: PipelineError::configuration(&url, message), retry_after: None };
            }
            Err(_) => {
                return AttemptOutcome::Failed { error: PipelineError::timeout(&url, timeout), retry_after: None };
            }
        };

        let response = self.interceptors.run_response(ctx, response);

        if response.is_success() {
            return match parse_body(&url, &response) {
                Ok(value) => AttemptOutcome::Success(value),
                Err(error) => AttemptOutcome::Failed { error, retry_after: None },
            };
        }

        if response.status == 401 {
            return AttemptOutcome::Unauthorized(response);
        }

        let retry_after = match response.status {
            429 | 503 => response.retry_after(),
            _ => None,
        };
        AttemptOutcome::Failed {
            error: PipelineError::from_status(&url, response.status, &response.body_text()),
            retry_after,
        }
    }

    /// Decide what a 401 means for the session
    ///
    /// Returns fresh credentials to re-send with, or the terminal error.
    async fn recover_session(
        &self,
        url: &str,
        credentials: &Option<CredentialRecord>,
        refreshed: bool,
        response: &TransportResponse,
    ) -> Result<CredentialRecord> {
        let Some(current) = credentials else {
            return Err(PipelineError::from_status(url, 401, &response.body_text()));
        };

        if refreshed {
            warn!("rejected again after refresh; session expired");
            self.coordinator.clear_credentials().await;
            return Err(PipelineError::auth_expired(url, "session expired; sign in again").with_status(401));
        }

        if !current.has_refresh_token() {
            self.coordinator.clear_credentials().await;
            return Err(PipelineError::auth_expired(url, "access token rejected and no refresh token")
                .with_status(401));
        }

        self.coordinator.refresh(current, url).await
    }

    fn after_success(&self, method: HttpMethod, url: &str, cache_key: Option<&CacheKey>, value: &Value) {
        if let Some(key) = cache_key {
            if !self.cache.set(key.clone(), value.clone(), None) {
                debug!(key = %key, "response cache full; write dropped");
            }
        } else if method.is_mutating() {
            let path = resource_path(url);
            let removed = self.cache.invalidate_resource(&path);
            if removed > 0 {
                debug!(path = %path, removed, "invalidated cached reads after mutation");
            }
        }
    }

    fn retry_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.backoff.delay(attempt);
        match retry_after {
            Some(hint) => delay.max(hint.min(self.backoff.ceiling())),
            None => delay,
        }
    }

    fn fail(&self, ctx: &RequestContext, error: PipelineError) -> PipelineError {
        self.interceptors.run_error(ctx, error)
    }
}

fn parse_body(url: &str, response: &TransportResponse) -> Result<Value> {
    if response.is_empty_status() || response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&response.body)
        .map_err(|err| PipelineError::malformed(url, format!("invalid JSON body: {err}")).with_status(response.status))
}

fn encode<B: Serialize + ?Sized>(url: &str, body: &B) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|err| PipelineError::configuration(url, format!("request body is not serializable: {err}")))
}

fn decode<T: DeserializeOwned>(url: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| PipelineError::malformed(url, format!("unexpected response shape: {err}")))
}
