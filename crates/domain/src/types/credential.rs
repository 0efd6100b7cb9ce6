//! Credential types
//!
//! A [`CredentialRecord`] is owned by the credential store. The pipeline never
//! mutates one in place; a refresh replaces the whole record.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Stored session credentials
///
/// Absence of a record means "unauthenticated".
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry of the access token
    pub expires_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Build a record that expires `expires_in_seconds` from now
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: now + ChronoDuration::seconds(expires_in_seconds.max(0)),
            stored_at: now,
        }
    }

    /// Whether the access token has passed its expiry instant
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Value for the `Authorization` header
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Tokens are secrets; keep them out of logs and panic messages.
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("stored_at", &self.stored_at)
            .finish()
    }
}

/// Token pair returned by the remote authority on refresh
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the authority does not rotate refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "expires_in")]
    pub expires_in_seconds: i64,
}

impl TokenGrant {
    /// Turn the grant into a storable record
    ///
    /// `previous_refresh_token` is kept when the authority did not issue a
    /// new one.
    #[must_use]
    pub fn into_record(self, previous_refresh_token: &str) -> CredentialRecord {
        let refresh_token = self
            .refresh_token
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| previous_refresh_token.to_string());
        CredentialRecord::new(self.access_token, refresh_token, self.expires_in_seconds)
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("rotated", &self.refresh_token.is_some())
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}
