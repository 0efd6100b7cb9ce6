//! Assembly of an HTTP-backed [`RequestPipeline`] from [`WaypointConfig`]

use std::sync::Arc;

use tracing::info;
use waypoint_core::{CredentialStore, RemoteAuthority, RequestPipeline, Transport};
use waypoint_domain::Result;

use crate::auth::{HttpRemoteAuthority, KeychainCredentialStore, UnconfiguredAuthority};
use crate::config::WaypointConfig;
use crate::http::ReqwestTransport;

/// Wires the reqwest transport, token authority and a credential store into
/// a pipeline
pub struct HttpPipeline;

impl HttpPipeline {
    /// Build a pipeline that keeps credentials in the platform keychain
    ///
    /// # Errors
    /// Returns a `Configuration` error when the HTTP client cannot be built
    /// or the pipeline config is invalid.
    pub fn from_config(config: &WaypointConfig) -> Result<RequestPipeline> {
        let store = Arc::new(KeychainCredentialStore::from_config(&config.keychain));
        Self::with_store(config, store)
    }

    /// Build a pipeline around an existing credential store
    ///
    /// The token authority shares the pipeline's transport. Without an
    /// `authority` section every refresh is rejected.
    ///
    /// # Errors
    /// Same as [`HttpPipeline::from_config`].
    pub fn with_store(
        config: &WaypointConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<RequestPipeline> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new()?);

        let authority: Arc<dyn RemoteAuthority> = match &config.authority {
            Some(authority) => {
                Arc::new(HttpRemoteAuthority::new(Arc::clone(&transport), authority.clone()))
            }
            None => Arc::new(UnconfiguredAuthority),
        };

        let mut builder =
            RequestPipeline::builder(transport, store, authority).config(config.pipeline.clone());
        if let Some(base_url) = &config.base_url {
            builder = builder.base_url(base_url.clone());
        }

        let pipeline = builder.build()?;
        info!(
            base_url = config.base_url.as_deref().unwrap_or("<none>"),
            refresh = config.authority.is_some(),
            "request pipeline ready"
        );
        Ok(pipeline)
    }
}
