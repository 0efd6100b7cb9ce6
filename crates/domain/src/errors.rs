//! Error types surfaced by the request pipeline
//!
//! Every terminal failure reaches the caller as a [`PipelineError`] carrying
//! the failing endpoint, the HTTP status (if any) and a timestamp, so callers
//! can tell "try again" from "re-authenticate" from "give up".

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for pipeline failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deadline exceeded (retryable)
    Timeout,
    /// Transport-level failure (retryable)
    NetworkFailure,
    /// 5xx or 429 response (retryable up to the attempt ceiling)
    ServerError,
    /// 4xx other than 401 (terminal)
    ClientError,
    /// Session cannot be recovered without signing in again (terminal)
    AuthExpired,
    /// Body failed to parse (terminal)
    MalformedResponse,
    /// Depth ceiling hit; indicates a logic defect (terminal)
    RecursionLimitExceeded,
    /// Invalid request options or pipeline configuration (terminal)
    Configuration,
    /// Credential store failed where the failure cannot be treated as soft
    CredentialStore,
}

impl ErrorKind {
    /// Stable label suitable for metrics and log fields
    pub fn label(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NetworkFailure => "network_failure",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::AuthExpired => "auth_expired",
            Self::MalformedResponse => "malformed_response",
            Self::RecursionLimitExceeded => "recursion_limit_exceeded",
            Self::Configuration => "configuration",
            Self::CredentialStore => "credential_store",
        }
    }

    /// Whether the pipeline re-attempts this kind automatically
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::NetworkFailure | Self::ServerError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a caller should do with a terminal error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFacingHint {
    /// Drive the user to a sign-in flow
    Reauthenticate,
    /// Generic "try again later"
    TryAgainLater,
    /// Server-provided message, shown verbatim
    Message(String),
    /// Nothing useful to show; report and give up
    GiveUp,
}

/// Terminal pipeline failure
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind} for {endpoint}{}: {message}", status_suffix(.status))]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub endpoint: String,
    pub status: Option<u16>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            status: None,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Attach the HTTP status that produced this error
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn timeout(endpoint: impl Into<String>, after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            endpoint,
            format!("{} after {}ms", crate::constants::TIMEOUT_MESSAGE, after.as_millis()),
        )
    }

    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure, endpoint, message)
    }

    pub fn auth_expired(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthExpired, endpoint, message)
    }

    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, endpoint, message)
    }

    pub fn configuration(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, endpoint, message)
    }

    /// Classify a non-success HTTP status
    ///
    /// 401 is classified as `AuthExpired`; the orchestrator only surfaces it
    /// after a refresh attempt has failed to recover the session.
    pub fn from_status(endpoint: impl Into<String>, status: u16, body: &str) -> Self {
        let kind = match status {
            401 => ErrorKind::AuthExpired,
            429 | 500..=599 => ErrorKind::ServerError,
            400..=499 => ErrorKind::ClientError,
            _ => ErrorKind::NetworkFailure,
        };
        let message = if body.trim().is_empty() {
            format!("request failed with status {status}")
        } else {
            body.trim().to_string()
        };
        Self::new(kind, endpoint, message).with_status(status)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn requires_reauthentication(&self) -> bool {
        self.kind == ErrorKind::AuthExpired
    }

    /// Map this error to the behaviour a caller should present
    pub fn user_facing_hint(&self) -> UserFacingHint {
        match self.kind {
            ErrorKind::AuthExpired => UserFacingHint::Reauthenticate,
            ErrorKind::Timeout | ErrorKind::NetworkFailure | ErrorKind::ServerError => {
                UserFacingHint::TryAgainLater
            }
            ErrorKind::ClientError => UserFacingHint::Message(self.message.clone()),
            ErrorKind::MalformedResponse
            | ErrorKind::RecursionLimitExceeded
            | ErrorKind::Configuration
            | ErrorKind::CredentialStore => UserFacingHint::GiveUp,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Transport-level failure (connection, deadline or unsendable request)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// The request could not be built (bad header, bad URL); never retried
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Failure reported by the remote token authority
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorityError {
    /// The refresh token was refused (revoked, expired, invalid_grant)
    #[error("Refresh rejected: {0}")]
    Rejected(String),

    /// The authority could not be reached or failed transiently
    #[error("Authority unavailable: {0}")]
    Unavailable(String),

    /// The authority answered with a body that could not be parsed
    #[error("Malformed token response: {0}")]
    Malformed(String),
}

/// Failure reported by a credential store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),

    #[error("Stored credentials are corrupt: {0}")]
    Corrupt(String),
}
