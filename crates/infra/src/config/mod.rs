//! Configuration loading and management
//!
//! This module provides the application-level configuration record and
//! utilities for loading it from environment variables and files.

pub mod loader;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use waypoint_domain::config::duration_millis;
use waypoint_domain::PipelineConfig;

use crate::observability::LogFormat;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};

const DEFAULT_AUTHORITY_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_KEYCHAIN_SERVICE: &str = "waypoint";
const DEFAULT_KEYCHAIN_ACCOUNT: &str = "default";

/// Everything needed to assemble an HTTP-backed pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaypointConfig {
    /// Prefix for relative request URLs
    pub base_url: Option<String>,
    pub pipeline: PipelineConfig,
    /// Token endpoint; without it refreshes are rejected
    pub authority: Option<AuthorityConfig>,
    pub keychain: KeychainConfig,
    pub log_format: LogFormat,
}

/// OAuth token endpoint used to refresh access tokens
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorityConfig {
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(with = "duration_millis", rename = "timeout_ms", default = "default_authority_timeout")]
    pub timeout: Duration,
}

impl AuthorityConfig {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            timeout: default_authority_timeout(),
        }
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }
}

// Keep the client secret out of logs.
impl fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn default_authority_timeout() -> Duration {
    Duration::from_millis(DEFAULT_AUTHORITY_TIMEOUT_MS)
}

/// Keychain entry that holds the credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeychainConfig {
    pub service: String,
    pub account: String,
}

impl Default for KeychainConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
            account: DEFAULT_KEYCHAIN_ACCOUNT.to_string(),
        }
    }
}
