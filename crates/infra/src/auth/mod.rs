//! Session adapters: token authority and credential storage

pub mod authority;
pub mod credential_store;

pub use authority::{HttpRemoteAuthority, UnconfiguredAuthority};
pub use credential_store::{KeychainCredentialStore, MemoryCredentialStore};
