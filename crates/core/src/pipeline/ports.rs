//! Port interface for the wire transport

use async_trait::async_trait;
use waypoint_domain::{TransportError, TransportRequest, TransportResponse};

/// "Send a request, receive status + headers + body"
///
/// Non-2xx statuses are responses, not errors; only connection failures and
/// deadline expiry are reported as [`TransportError`]. Implementations should
/// honour `request.timeout`; the pipeline additionally enforces it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
