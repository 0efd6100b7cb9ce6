//! OAuth refresh-token grant against a token endpoint

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::form_urlencoded;
use waypoint_core::{RemoteAuthority, Transport};
use waypoint_domain::{
    AuthorityError, HttpMethod, TokenGrant, TransportError, TransportRequest, TransportResponse,
};

use crate::config::AuthorityConfig;

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// [`RemoteAuthority`] that posts `grant_type=refresh_token` to the token URL
///
/// Sends through a [`Transport`] directly, never through the request
/// pipeline, so a refresh cannot itself trigger a refresh.
pub struct HttpRemoteAuthority {
    transport: Arc<dyn Transport>,
    config: AuthorityConfig,
}

impl HttpRemoteAuthority {
    pub fn new(transport: Arc<dyn Transport>, config: AuthorityConfig) -> Self {
        Self { transport, config }
    }

    fn form_body(&self, refresh_token: &str) -> Vec<u8> {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", "refresh_token")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("refresh_token", refresh_token);
        if let Some(secret) = &self.config.client_secret {
            form.append_pair("client_secret", secret);
        }
        form.finish().into_bytes()
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthorityError> {
        if refresh_token.is_empty() {
            return Err(AuthorityError::Rejected("no refresh token provided".to_string()));
        }

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/x-www-form-urlencoded".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());

        let request = TransportRequest {
            method: HttpMethod::Post,
            url: self.config.token_url.clone(),
            headers,
            body: Some(self.form_body(refresh_token)),
            timeout: self.config.timeout,
        };

        debug!(token_url = %self.config.token_url, "requesting token refresh");
        let response = self.transport.send(request).await.map_err(|err| match err {
            TransportError::Timeout(after) => {
                AuthorityError::Unavailable(format!("token endpoint timed out after {after:?}"))
            }
            TransportError::Network(message) | TransportError::InvalidRequest(message) => {
                AuthorityError::Unavailable(message)
            }
        })?;

        classify(response)
    }
}

/// [`RemoteAuthority`] used when no token endpoint is configured
///
/// Every refresh is rejected, so an expired session ends with `AuthExpired`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredAuthority;

#[async_trait]
impl RemoteAuthority for UnconfiguredAuthority {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, AuthorityError> {
        Err(AuthorityError::Rejected("no token endpoint configured".to_string()))
    }
}

fn classify(response: TransportResponse) -> Result<TokenGrant, AuthorityError> {
    match response.status {
        200..=299 => serde_json::from_slice::<TokenGrant>(&response.body)
            .map_err(|err| AuthorityError::Malformed(format!("invalid token response: {err}"))),
        400 | 401 => {
            let reason = describe_error(&response);
            warn!(status = response.status, reason = %reason, "token endpoint rejected refresh");
            Err(AuthorityError::Rejected(reason))
        }
        status => Err(AuthorityError::Unavailable(format!(
            "token endpoint returned status {status}: {}",
            describe_error(&response)
        ))),
    }
}

fn describe_error(response: &TransportResponse) -> String {
    match serde_json::from_slice::<OAuthErrorBody>(&response.body) {
        Ok(body) => match body.error_description {
            Some(description) => format!("{}: {description}", body.error),
            None => body.error,
        },
        Err(_) if response.body.is_empty() => format!("status {}", response.status),
        Err(_) => response.body_text(),
    }
}
