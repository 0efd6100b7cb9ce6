//! Port interfaces for session credentials
//!
//! These traits define the boundaries between the refresh logic and the
//! infrastructure that persists credentials and talks to the token endpoint.

use async_trait::async_trait;
use waypoint_domain::{AuthorityError, CredentialRecord, StoreError, TokenGrant};

/// Durable storage for the current session's credentials
///
/// Absence of a record means "unauthenticated". Implementations must be safe
/// to call concurrently; the pipeline always awaits one call before issuing
/// the next.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the stored record, if any
    async fn get(&self) -> Result<Option<CredentialRecord>, StoreError>;

    /// Replace the stored record wholesale
    async fn put(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Remove the stored record; deleting nothing is not an error
    async fn delete(&self) -> Result<(), StoreError>;
}

/// Remote token authority
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Exchange a refresh token for a new token pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthorityError>;
}
