//! # Waypoint Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - HTTP transport (reqwest, rustls)
//! - OAuth token authority over that transport
//! - Credential stores (platform keychain, in-memory)
//! - Configuration loading (TOML/JSON files, `WAYPOINT_*` env vars)
//! - Tracing subscriber bootstrap
//!
//! ## Architecture
//! - Implements traits defined in `waypoint-core`
//! - Depends on `waypoint-domain` and `waypoint-core`
//! - Contains all "impure" code (network, keychain, filesystem)

pub mod auth;
pub mod config;
pub(crate) mod errors;
pub mod http;
pub mod observability;
pub mod pipeline;

// Re-export commonly used items
pub use auth::{
    HttpRemoteAuthority, KeychainCredentialStore, MemoryCredentialStore, UnconfiguredAuthority,
};
pub use config::{AuthorityConfig, KeychainConfig, WaypointConfig};
pub use http::{ReqwestTransport, ReqwestTransportBuilder};
pub use observability::{init_tracing, LogFormat};
pub use pipeline::HttpPipeline;
