//! Pipeline data model

pub mod credential;
pub mod request;

pub use credential::{CredentialRecord, TokenGrant};
pub use request::{HttpMethod, RequestOptions, TransportRequest, TransportResponse};
