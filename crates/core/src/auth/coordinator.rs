//! Token refresh coordination
//!
//! At most one call to the remote authority is in flight process-wide. A
//! caller whose stale refresh token is already being refreshed joins that
//! refresh instead of queueing for a redundant one; the check runs once
//! before taking the [`RefreshMutex`] and once after, against the credential
//! store, to catch refreshes that finished while the caller was parked.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};
use waypoint_common::resilience::{Clock, SystemClock};
use waypoint_common::sync::{OutcomeCell, OutcomeHandle};
use waypoint_domain::{
    AuthorityError, CredentialRecord, ErrorKind, PipelineConfig, PipelineError, Result, StoreError,
};

use super::ledger::{fingerprint, LedgerDecision, RefreshLedger};
use super::mutex::RefreshMutex;
use super::ports::{CredentialStore, RemoteAuthority};
use crate::metrics::PipelineMetrics;

/// The refresh currently being performed by the mutex holder
struct ActiveRefresh {
    id: u64,
    refresh_token: String,
    outcome: OutcomeHandle<CredentialRecord, PipelineError>,
}

#[derive(Default)]
struct ActiveSlot {
    current: Option<ActiveRefresh>,
    next_id: u64,
}

/// Single-flight refresh of session credentials
pub struct TokenRefreshCoordinator<C: Clock = SystemClock> {
    store: Arc<dyn CredentialStore>,
    authority: Arc<dyn RemoteAuthority>,
    mutex: RefreshMutex,
    ledger: RefreshLedger<C>,
    active: Mutex<ActiveSlot>,
    metrics: Arc<PipelineMetrics>,
}

impl TokenRefreshCoordinator<SystemClock> {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn RemoteAuthority>,
        config: &PipelineConfig,
    ) -> Self {
        Self::with_clock(store, authority, config, SystemClock)
    }
}

impl<C: Clock> TokenRefreshCoordinator<C> {
    pub fn with_clock(
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn RemoteAuthority>,
        config: &PipelineConfig,
        clock: C,
    ) -> Self {
        Self {
            store,
            authority,
            mutex: RefreshMutex::new(),
            ledger: RefreshLedger::with_clock(
                config.refresh_window,
                config.max_refresh_attempts,
                clock,
            ),
            active: Mutex::new(ActiveSlot::default()),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Share counters with the owning pipeline
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn ledger(&self) -> &RefreshLedger<C> {
        &self.ledger
    }

    /// Whether a refresh is running right now
    pub fn is_refreshing(&self) -> bool {
        self.mutex.is_held()
    }

    /// Obtain credentials that replace `stale`
    ///
    /// `endpoint` only labels errors. Returns `AuthExpired` when the session
    /// cannot be recovered; credentials are cleared in that case.
    #[instrument(skip(self, stale), fields(endpoint = %endpoint))]
    pub async fn refresh(&self, stale: &CredentialRecord, endpoint: &str) -> Result<CredentialRecord> {
        if !stale.has_refresh_token() {
            return Err(PipelineError::auth_expired(endpoint, "no refresh token available"));
        }

        if let Some(outcome) = self.joinable(&stale.refresh_token) {
            debug!("joining in-flight refresh");
            if let Some(result) = outcome.wait().await {
                return result;
            }
            debug!("in-flight refresh was abandoned; queueing");
        }

        let _permit = self.mutex.acquire().await;

        if let Some(current) = self.refreshed_elsewhere(stale, endpoint).await? {
            debug!("credentials already refreshed while waiting");
            return Ok(current);
        }

        self.refresh_locked(stale, endpoint).await
    }

    fn joinable(&self, refresh_token: &str) -> Option<OutcomeHandle<CredentialRecord, PipelineError>> {
        let slot = self.active.lock();
        slot.current
            .as_ref()
            .filter(|active| active.refresh_token == refresh_token)
            .map(|active| active.outcome.clone())
    }

    /// Post-acquire check: compare the store with what the caller saw
    async fn refreshed_elsewhere(
        &self,
        stale: &CredentialRecord,
        endpoint: &str,
    ) -> Result<Option<CredentialRecord>> {
        match self.store.get().await {
            Ok(Some(current)) if current.access_token != stale.access_token => Ok(Some(current)),
            Ok(Some(_)) => Ok(None),
            Ok(None) => {
                Err(PipelineError::auth_expired(endpoint, "credentials were cleared during refresh"))
            }
            Err(StoreError::Corrupt(reason)) => {
                warn!(reason = %reason, "stored credentials are corrupt; signing out");
                self.clear_credentials().await;
                Err(PipelineError::auth_expired(endpoint, "stored credentials are corrupt; sign in again"))
            }
            Err(err) => Err(PipelineError::new(ErrorKind::CredentialStore, endpoint, err.to_string())),
        }
    }

    async fn refresh_locked(&self, stale: &CredentialRecord, endpoint: &str) -> Result<CredentialRecord> {
        let token_fp = fingerprint(&stale.refresh_token);

        match self.ledger.register_attempt(&token_fp) {
            LedgerDecision::Exhausted => {
                warn!(
                    token_fp = %token_fp,
                    ceiling = self.ledger.ceiling(),
                    "refresh attempt ceiling reached; signing out"
                );
                self.clear_credentials().await;
                return Err(PipelineError::auth_expired(
                    endpoint,
                    "refresh attempt limit reached; sign in again",
                ));
            }
            LedgerDecision::Proceed { attempt } => {
                debug!(token_fp = %token_fp, attempt, "refreshing access token");
            }
        }

        let (cell, outcome) = OutcomeCell::new();
        let active_guard = self.publish_active(&stale.refresh_token, outcome);

        let result = self.exchange(stale, endpoint, &token_fp).await;
        self.metrics.record_refresh(result.is_ok());

        drop(active_guard);
        cell.resolve(result.clone());
        result
    }

    async fn exchange(
        &self,
        stale: &CredentialRecord,
        endpoint: &str,
        token_fp: &str,
    ) -> Result<CredentialRecord> {
        match self.authority.refresh(&stale.refresh_token).await {
            Ok(grant) => {
                let record = grant.into_record(&stale.refresh_token);
                if let Err(err) = self.store.put(&record).await {
                    error!(error = %err, "failed to persist refreshed credentials");
                    return Err(PipelineError::new(
                        ErrorKind::CredentialStore,
                        endpoint,
                        format!("failed to persist refreshed credentials: {err}"),
                    ));
                }
                self.ledger.clear(token_fp);
                info!(
                    token_fp = %token_fp,
                    rotated = record.refresh_token != stale.refresh_token,
                    expires_at = %record.expires_at,
                    "access token refreshed"
                );
                Ok(record)
            }
            Err(AuthorityError::Rejected(reason)) => {
                error!(token_fp = %token_fp, reason = %reason, "refresh token rejected");
                self.ledger.clear(token_fp);
                self.clear_credentials().await;
                Err(PipelineError::auth_expired(endpoint, format!("refresh rejected: {reason}")))
            }
            Err(AuthorityError::Unavailable(reason)) => {
                warn!(token_fp = %token_fp, reason = %reason, "token endpoint unavailable");
                Err(PipelineError::network(endpoint, format!("token refresh failed: {reason}")))
            }
            Err(AuthorityError::Malformed(reason)) => {
                warn!(token_fp = %token_fp, reason = %reason, "malformed token response");
                Err(PipelineError::malformed(endpoint, format!("token response: {reason}")))
            }
        }
    }

    fn publish_active(
        &self,
        refresh_token: &str,
        outcome: OutcomeHandle<CredentialRecord, PipelineError>,
    ) -> ActiveGuard<'_> {
        let mut slot = self.active.lock();
        let id = slot.next_id;
        slot.next_id += 1;
        slot.current = Some(ActiveRefresh { id, refresh_token: refresh_token.to_string(), outcome });
        ActiveGuard { slot: &self.active, id }
    }

    /// Best-effort removal of stored credentials
    pub async fn clear_credentials(&self) {
        if let Err(err) = self.store.delete().await {
            warn!(error = %err, "failed to clear stored credentials");
        }
    }
}

/// Clears the active-refresh pointer on every exit path, including
/// cancellation of the refreshing task
struct ActiveGuard<'a> {
    slot: &'a Mutex<ActiveSlot>,
    id: u64,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.current.as_ref().is_some_and(|active| active.id == self.id) {
            slot.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use waypoint_common::resilience::MockClock;
    use waypoint_domain::TokenGrant;

    use super::*;
    use crate::testing::{MockRemoteAuthority, RecordingCredentialStore};

    fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in_seconds: 3600,
        }
    }

    fn coordinator(
        store: &Arc<RecordingCredentialStore>,
        authority: &Arc<MockRemoteAuthority>,
    ) -> (TokenRefreshCoordinator<MockClock>, MockClock) {
        let clock = MockClock::new();
        let coordinator = TokenRefreshCoordinator::with_clock(
            Arc::clone(store) as Arc<dyn CredentialStore>,
            Arc::clone(authority) as Arc<dyn RemoteAuthority>,
            &PipelineConfig::default(),
            clock.clone(),
        );
        (coordinator, clock)
    }

    #[tokio::test]
    async fn test_successful_refresh_updates_store() {
        let stale = CredentialRecord::new("old-access", "old-refresh", 0);
        let store = Arc::new(RecordingCredentialStore::with_record(stale.clone()));
        let authority = Arc::new(MockRemoteAuthority::granting(grant("new-access", Some("new-refresh"))));
        let (coordinator, _) = coordinator(&store, &authority);

        let fresh = coordinator.refresh(&stale, "/profile").await.unwrap();
        assert_eq!(fresh.access_token, "new-access");
        assert_eq!(fresh.refresh_token, "new-refresh");
        assert_eq!(store.current().unwrap().access_token, "new-access");
        assert_eq!(authority.calls(), 1);
        assert_eq!(authority.tokens_seen(), vec!["old-refresh".to_string()]);
        assert_eq!(coordinator.ledger().attempts(&fingerprint("old-refresh")), 0);
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let stale = CredentialRecord::new("old-access", "long-lived", 0);
        let store = Arc::new(RecordingCredentialStore::with_record(stale.clone()));
        let authority = Arc::new(MockRemoteAuthority::granting(grant("new-access", None)));
        let (coordinator, _) = coordinator(&store, &authority);

        let fresh = coordinator.refresh(&stale, "/profile").await.unwrap();
        assert_eq!(fresh.refresh_token, "long-lived");
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_credentials() {
        let stale = CredentialRecord::new("old-access", "revoked", 0);
        let store = Arc::new(RecordingCredentialStore::with_record(stale.clone()));
        let authority = Arc::new(MockRemoteAuthority::failing(AuthorityError::Rejected(
            "invalid_grant".to_string(),
        )));
        let (coordinator, _) = coordinator(&store, &authority);

        let err = coordinator.refresh(&stale, "/profile").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthExpired);
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_credentials() {
        let stale = CredentialRecord::new("old-access", "refresh", 0);
        let store = Arc::new(RecordingCredentialStore::with_record(stale.clone()));
        let authority = Arc::new(MockRemoteAuthority::failing(AuthorityError::Unavailable(
            "connection reset".to_string(),
        )));
        let (coordinator, _) = coordinator(&store, &authority);

        let err = coordinator.refresh(&stale, "/profile").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkFailure);
        assert!(store.current().is_some());
        assert!(!coordinator.is_refreshing());
    }

    /// Validates the refresh ceiling for one refresh token.
    ///
    /// Assertions:
    /// - Two failing attempts reach the authority.
    /// - The third is refused without contacting it and clears credentials.
    #[tokio::test]
    async fn test_ceiling_short_circuits_without_contacting_authority() {
        let stale = CredentialRecord::new("old-access", "refresh", 0);
        let store = Arc::new(RecordingCredentialStore::with_record(stale.clone()));
        let authority = Arc::new(MockRemoteAuthority::failing(AuthorityError::Unavailable(
            "503".to_string(),
        )));
        let (coordinator, clock) = coordinator(&store, &authority);

        assert!(coordinator.refresh(&stale, "/a").await.is_err());
        clock.advance(Duration::from_secs(5));
        assert!(coordinator.refresh(&stale, "/a").await.is_err());
        clock.advance(Duration::from_secs(5));

        let err = coordinator.refresh(&stale, "/a").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthExpired);
        assert_eq!(authority.calls(), 2);
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_already_refreshed_credentials_are_reused() {
        let stale = CredentialRecord::new("old-access", "refresh", 0);
        let newer = CredentialRecord::new("newer-access", "refresh-2", 3600);
        let store = Arc::new(RecordingCredentialStore::with_record(newer));
        let authority = Arc::new(MockRemoteAuthority::granting(grant("unused", None)));
        let (coordinator, _) = coordinator(&store, &authority);

        let fresh = coordinator.refresh(&stale, "/a").await.unwrap();
        assert_eq!(fresh.access_token, "newer-access");
        assert_eq!(authority.calls(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_during_wait_is_auth_expired() {
        let stale = CredentialRecord::new("old-access", "refresh", 0);
        let store = Arc::new(RecordingCredentialStore::new());
        let authority = Arc::new(MockRemoteAuthority::granting(grant("unused", None)));
        let (coordinator, _) = coordinator(&store, &authority);

        let err = coordinator.refresh(&stale, "/a").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthExpired);
        assert_eq!(authority.calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_store_during_refresh_signs_out() {
        let stale = CredentialRecord::new("old-access", "refresh", 0);
        let store = Arc::new(RecordingCredentialStore::with_record(stale.clone()));
        store.corrupt_gets(true);
        let authority = Arc::new(MockRemoteAuthority::granting(grant("unused", None)));
        let (coordinator, _) = coordinator(&store, &authority);

        let err = coordinator.refresh(&stale, "/a").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthExpired);
        assert_eq!(store.deletes(), 1);
        assert!(store.current().is_none());
        assert_eq!(authority.calls(), 0);
    }

    /// Validates single-flight refresh under concurrent triggers.
    ///
    /// Assertions:
    /// - The authority sees exactly one call and never two at once.
    /// - Every caller receives the same new access token.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_share_one_call() {
        let stale = CredentialRecord::new("old-access", "shared-refresh", 0);
        let store = Arc::new(RecordingCredentialStore::with_record(stale.clone()));
        let authority = Arc::new(
            MockRemoteAuthority::granting(grant("new-access", Some("next-refresh")))
                .with_delay(Duration::from_millis(50)),
        );
        let (coordinator, _) = coordinator(&store, &authority);
        let coordinator = Arc::new(coordinator);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let stale = stale.clone();
            tasks.push(tokio::spawn(async move { coordinator.refresh(&stale, "/a").await }));
        }

        for task in tasks {
            let fresh = task.await.unwrap().unwrap();
            assert_eq!(fresh.access_token, "new-access");
        }
        assert_eq!(authority.calls(), 1);
        assert_eq!(authority.max_concurrent(), 1);
    }
}
