//! Credential store adapters
//!
//! - [`KeychainCredentialStore`]: platform keychain (macOS Keychain, Windows
//!   Credential Manager, Linux Secret Service) via the `keyring` crate
//! - [`MemoryCredentialStore`]: process-local, for tests and headless tools

use async_trait::async_trait;
use keyring::Entry;
use parking_lot::RwLock;
use tracing::debug;
use waypoint_core::CredentialStore;
use waypoint_domain::{CredentialRecord, StoreError};

use crate::config::KeychainConfig;
use crate::errors::IntoStoreError;

/// Stores the credential record as one JSON secret under a service/account
/// pair
///
/// Keychain calls block, so each one runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct KeychainCredentialStore {
    service: String,
    account: String,
}

impl KeychainCredentialStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self { service: service.into(), account: account.into() }
    }

    pub fn from_config(config: &KeychainConfig) -> Self {
        Self::new(config.service.clone(), config.account.clone())
    }

    async fn with_entry<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StoreError> + Send + 'static,
    {
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &account).map_err(IntoStoreError::into_store_error)?;
            op(entry)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("keychain task failed: {err}")))?
    }
}

#[async_trait]
impl CredentialStore for KeychainCredentialStore {
    async fn get(&self) -> Result<Option<CredentialRecord>, StoreError> {
        debug!(service = %self.service, account = %self.account, "Retrieving credentials from keychain");
        self.with_entry(|entry| match entry.get_password() {
            Ok(secret) => serde_json::from_str(&secret)
                .map(Some)
                .map_err(|err| StoreError::Corrupt(format!("stored credentials are not valid JSON: {err}"))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into_store_error()),
        })
        .await
    }

    async fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        debug!(service = %self.service, account = %self.account, "Storing credentials in keychain");
        let secret = serde_json::to_string(record)
            .map_err(|err| StoreError::Corrupt(format!("credentials could not be encoded: {err}")))?;
        self.with_entry(move |entry| entry.set_password(&secret).map_err(IntoStoreError::into_store_error))
            .await
    }

    async fn delete(&self) -> Result<(), StoreError> {
        debug!(service = %self.service, account = %self.account, "Deleting credentials from keychain");
        self.with_entry(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into_store_error()),
        })
        .await
    }
}

/// Process-local credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: RwLock<Option<CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        Self { record: RwLock::new(Some(record)) }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.record.read().clone())
    }

    async fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        *self.record.write() = Some(record.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        self.record.write().take();
        Ok(())
    }
}
