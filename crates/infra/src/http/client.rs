use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Method};
use tracing::debug;
use waypoint_core::Transport;
use waypoint_domain::{
    HttpMethod, PipelineError, Result, TransportError, TransportRequest, TransportResponse,
};

use crate::errors::IntoTransportError;

/// [`Transport`] backed by a shared reqwest client.
///
/// Performs exactly one exchange per `send`; retries, refresh and caching are
/// the pipeline's job.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Start building a new transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let deadline = request.timeout;
        let mut builder = self
            .client
            .request(to_method(request.method), &request.url)
            .headers(to_header_map(&request.headers)?)
            .timeout(deadline);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        debug!(method = %request.method, url = %request.url, "sending HTTP request");
        let response = builder.send().await.map_err(|err| err.into_transport_error(deadline))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|err| err.into_transport_error(deadline))?;

        debug!(url = %request.url, status, bytes = body.len(), "received HTTP response");
        Ok(TransportResponse { status, headers, body: body.to_vec() })
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    connect_timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
    accept_invalid_certs: bool,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            default_headers: None,
            accept_invalid_certs: false,
        }
    }
}

impl ReqwestTransportBuilder {
    /// Deadline for establishing a connection; the whole exchange is bounded
    /// per request.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// Test-only helper to allow insecure TLS (e.g., self-signed certs).
    #[cfg(test)]
    pub fn accept_invalid_certs(mut self, enabled: bool) -> Self {
        self.accept_invalid_certs = enabled;
        self
    }

    pub fn build(self) -> Result<ReqwestTransport> {
        let mut builder = ReqwestClient::builder().connect_timeout(self.connect_timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|err| {
            PipelineError::configuration("transport", format!("failed to build HTTP client: {err}"))
        })?;

        Ok(ReqwestTransport { client })
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn to_header_map(headers: &BTreeMap<String, String>) -> std::result::Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| TransportError::InvalidRequest(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| TransportError::InvalidRequest(format!("invalid value for header '{name}': {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
