//! In-memory port implementations for tests and benches
//!
//! Enabled for this crate's own tests and, for downstream crates, through the
//! `test-utils` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use waypoint_domain::{
    AuthorityError, CredentialRecord, StoreError, TokenGrant, TransportError, TransportRequest,
    TransportResponse,
};

use crate::auth::{CredentialStore, RemoteAuthority};
use crate::pipeline::Transport;

type TransportResult = Result<TransportResponse, TransportError>;
type Handler = Arc<dyn Fn(&TransportRequest) -> TransportResult + Send + Sync>;

/// Tracks how many calls overlap
#[derive(Debug, Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

struct GaugeGuard<'a>(&'a ConcurrencyGauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport that replays queued outcomes, then falls back to a handler
///
/// With neither left, every send fails with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<TransportResult>>,
    handler: Option<Handler>,
    delay: Option<Duration>,
    requests: Mutex<Vec<TransportRequest>>,
    gauge: ConcurrencyGauge,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with `response`
    pub fn always(response: TransportResponse) -> Self {
        Self::with_handler(move |_| Ok(response.clone()))
    }

    /// Answer every request through `handler`
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&TransportRequest) -> TransportResult + Send + Sync + 'static,
    {
        Self { handler: Some(Arc::new(handler)), ..Self::default() }
    }

    /// Wait this long before answering each request
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn then(self, response: TransportResponse) -> Self {
        self.push(response);
        self
    }

    #[must_use]
    pub fn then_error(self, error: TransportError) -> Self {
        self.push_error(error);
        self
    }

    pub fn push(&self, response: TransportResponse) {
        self.script.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<TransportRequest> {
        self.requests.lock().last().cloned()
    }

    /// Requests sent to URLs ending with `suffix`
    pub fn calls_to(&self, suffix: &str) -> usize {
        self.requests.lock().iter().filter(|request| request.url.ends_with(suffix)).count()
    }

    pub fn max_concurrent(&self) -> usize {
        self.gauge.max()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> TransportResult {
        let _gauge = self.gauge.enter();
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        match (scripted, &self.handler) {
            (Some(outcome), _) => outcome,
            (None, Some(handler)) => handler(&request),
            (None, None) => Err(TransportError::Network("script exhausted".to_string())),
        }
    }
}

/// Token authority with a fixed answer
pub struct MockRemoteAuthority {
    outcome: Result<TokenGrant, AuthorityError>,
    delay: Option<Duration>,
    tokens_seen: Mutex<Vec<String>>,
    gauge: ConcurrencyGauge,
}

impl MockRemoteAuthority {
    pub fn granting(grant: TokenGrant) -> Self {
        Self::answering(Ok(grant))
    }

    pub fn failing(error: AuthorityError) -> Self {
        Self::answering(Err(error))
    }

    fn answering(outcome: Result<TokenGrant, AuthorityError>) -> Self {
        Self {
            outcome,
            delay: None,
            tokens_seen: Mutex::new(Vec::new()),
            gauge: ConcurrencyGauge::default(),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.tokens_seen.lock().len()
    }

    /// Refresh tokens presented, in call order
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.gauge.max()
    }
}

#[async_trait]
impl RemoteAuthority for MockRemoteAuthority {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthorityError> {
        let _gauge = self.gauge.enter();
        self.tokens_seen.lock().push(refresh_token.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

/// In-memory credential store that counts operations and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
    corrupt_get: AtomicBool,
}

impl RecordingCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        let store = Self::default();
        *store.record.lock() = Some(record);
        store
    }

    pub fn current(&self) -> Option<CredentialRecord> {
        self.record.lock().clone()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Reads fail with `Corrupt` until the entry is deleted
    pub fn corrupt_gets(&self, corrupt: bool) {
        self.corrupt_get.store(corrupt, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStore for RecordingCredentialStore {
    async fn get(&self) -> Result<Option<CredentialRecord>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("keychain locked".to_string()));
        }
        if self.corrupt_get.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("stored credentials are not valid JSON".to_string()));
        }
        Ok(self.record.lock().clone())
    }

    async fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("keychain locked".to_string()));
        }
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("keychain locked".to_string()));
        }
        *self.record.lock() = None;
        self.corrupt_get.store(false, Ordering::SeqCst);
        Ok(())
    }
}
