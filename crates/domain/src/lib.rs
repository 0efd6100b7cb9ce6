//! # Waypoint Domain
//!
//! Data model shared by every Waypoint crate.
//!
//! This crate contains:
//! - Credential and token types
//! - Request options and wire-level request/response records
//! - The pipeline error taxonomy and Result alias
//! - Pipeline configuration and default constants
//!
//! ## Architecture
//! - No dependencies on other Waypoint crates
//! - Only external dependencies allowed
//! - Pure data structures; no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

pub use config::PipelineConfig;
pub use errors::*;
pub use types::*;
