//! Error mapping at the infrastructure boundary
//!
//! Adapters report failures through the port error types defined in
//! `waypoint-domain` (`TransportError`, `StoreError`, `AuthorityError`); the
//! orchestrator turns those into `PipelineError`s.

pub(crate) mod conversions;

pub(crate) use conversions::{IntoStoreError, IntoTransportError};
