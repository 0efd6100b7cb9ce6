//! Request description types
//!
//! [`RequestOptions`] is the explicit option record accepted by the pipeline's
//! `call` entry point. Unknown fields are rejected when deserialized.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::option_duration_millis;

/// HTTP methods understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Only GET responses are cached and deduplicated
    pub fn is_cacheable(self) -> bool {
        self == Self::Get
    }

    /// Methods whose success invalidates cached reads of the same resource
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestOptions {
    pub method: HttpMethod,
    /// Extra request headers; names are stored lower-case
    pub headers: BTreeMap<String, String>,
    /// JSON body for mutating calls
    pub body: Option<Value>,
    /// Overrides the configured request timeout
    #[serde(with = "option_duration_millis", rename = "timeout_ms")]
    pub timeout: Option<Duration>,
    /// Overrides the configured retry ceiling
    pub max_retries: Option<u32>,
    /// Skip the response cache and the in-flight registry
    pub bypass_cache: bool,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self { method: HttpMethod::Post, body: Some(body), ..Self::default() }
    }

    pub fn put(body: Value) -> Self {
        Self { method: HttpMethod::Put, body: Some(body), ..Self::default() }
    }

    pub fn patch(body: Value) -> Self {
        Self { method: HttpMethod::Patch, body: Some(body), ..Self::default() }
    }

    pub fn delete() -> Self {
        Self { method: HttpMethod::Delete, ..Self::default() }
    }

    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    #[must_use]
    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Whether this call may be served from or stored in the response cache
    pub fn is_cacheable(&self) -> bool {
        self.method.is_cacheable() && !self.bypass_cache
    }
}

/// Wire-level request handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange
    pub timeout: Duration,
}

/// Wire-level response returned by a transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lower-case
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: BTreeMap::new(), body: body.into() }
    }

    /// Convenience constructor for JSON bodies
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Statuses that carry no body by definition
    pub fn is_empty_status(&self) -> bool {
        self.status == 204 || self.status == 205
    }

    /// `Retry-After` in whole seconds, when present and numeric
    pub fn retry_after(&self) -> Option<Duration> {
        self.header(crate::constants::RETRY_AFTER_HEADER)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
