//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use waypoint_core::testing::{MockRemoteAuthority, RecordingCredentialStore, ScriptedTransport};
use waypoint_core::{CredentialStore, RemoteAuthority, RequestPipeline, Transport};
use waypoint_domain::{
    AuthorityError, CredentialRecord, PipelineConfig, TokenGrant, TransportRequest,
    TransportResponse,
};

pub const BASE_URL: &str = "https://api.test";

/// Millisecond-scale delays so retry tests finish quickly
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        request_timeout: Duration::from_secs(2),
        ..PipelineConfig::default()
    }
}

pub fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_in_seconds: 3600,
    }
}

pub fn bearer(request: &TransportRequest) -> Option<&str> {
    request.headers.get("authorization").map(String::as_str)
}

pub fn json_ok(body: &str) -> TransportResponse {
    TransportResponse::new(200, body).with_header("content-type", "application/json")
}

/// A pipeline plus handles on each of its test doubles
pub struct Harness {
    pub pipeline: Arc<RequestPipeline>,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<RecordingCredentialStore>,
    pub authority: Arc<MockRemoteAuthority>,
}

impl Harness {
    pub fn new(
        transport: ScriptedTransport,
        store: RecordingCredentialStore,
        authority: MockRemoteAuthority,
    ) -> Self {
        Self::with_config(transport, store, authority, fast_config())
    }

    pub fn with_config(
        transport: ScriptedTransport,
        store: RecordingCredentialStore,
        authority: MockRemoteAuthority,
        config: PipelineConfig,
    ) -> Self {
        let transport = Arc::new(transport);
        let store = Arc::new(store);
        let authority = Arc::new(authority);
        let pipeline = RequestPipeline::builder(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            Arc::clone(&authority) as Arc<dyn RemoteAuthority>,
        )
        .config(config)
        .base_url(BASE_URL)
        .build()
        .expect("test config should be valid");
        Self { pipeline: Arc::new(pipeline), transport, store, authority }
    }

    /// Signed in with a valid session; the authority refuses refreshes
    pub fn signed_in(transport: ScriptedTransport) -> Self {
        Self::new(
            transport,
            RecordingCredentialStore::with_record(CredentialRecord::new("access-1", "refresh-1", 3600)),
            MockRemoteAuthority::failing(AuthorityError::Rejected("not expected".to_string())),
        )
    }
}
