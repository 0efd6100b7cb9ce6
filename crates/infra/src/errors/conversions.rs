//! Conversions from external infrastructure errors into port errors.

use std::time::Duration;

use keyring::Error as KeyringError;
use reqwest::Error as HttpError;
use waypoint_domain::{StoreError, TransportError};

/// Map a keyring failure onto the credential-store port error
pub(crate) trait IntoStoreError {
    fn into_store_error(self) -> StoreError;
}

/// Map a reqwest failure onto the transport port error
pub(crate) trait IntoTransportError {
    /// `deadline` is reported when the failure was a timeout
    fn into_transport_error(self, deadline: Duration) -> TransportError;
}

/* -------------------------------------------------------------------------- */
/* keyring::Error → StoreError */
/* -------------------------------------------------------------------------- */

impl IntoStoreError for KeyringError {
    fn into_store_error(self) -> StoreError {
        use KeyringError::*;

        let description = self.to_string();

        match self {
            BadEncoding(_) => StoreError::Corrupt("credential in keychain is not valid UTF-8".into()),
            TooLong(name, limit) => StoreError::Unavailable(format!(
                "keychain attribute '{name}' exceeds platform limit ({limit})"
            )),
            Invalid(attr, reason) => {
                StoreError::Unavailable(format!("keychain attribute '{attr}' is invalid: {reason}"))
            }
            Ambiguous(entries) => StoreError::Unavailable(format!(
                "multiple keychain entries matched request ({} results)",
                entries.len()
            )),
            PlatformFailure(err) => StoreError::Unavailable(format!("keychain platform error: {err}")),
            NoStorageAccess(err) => {
                StoreError::Unavailable(format!("unable to access secure storage: {err}"))
            }
            _ => StoreError::Unavailable(description),
        }
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → TransportError */
/* -------------------------------------------------------------------------- */

impl IntoTransportError for HttpError {
    fn into_transport_error(self, deadline: Duration) -> TransportError {
        if self.is_timeout() {
            return TransportError::Timeout(deadline);
        }
        if self.is_builder() {
            return TransportError::InvalidRequest(format!("HTTP request could not be built: {self}"));
        }
        if self.is_connect() {
            return TransportError::Network(format!("HTTP connection failed: {self}"));
        }
        if self.is_body() || self.is_decode() {
            return TransportError::Network(format!("HTTP body could not be read: {self}"));
        }
        TransportError::Network(format!("HTTP request failed: {self}"))
    }
}
