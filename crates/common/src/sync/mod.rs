//! Coordination primitives for concurrent callers
//!
//! - [`OutcomeCell`] / [`OutcomeHandle`]: write-once shared result
//! - [`InFlightRegistry`]: single-flight admission keyed by request identity

pub mod outcome;
pub mod registry;

pub use outcome::{OutcomeCell, OutcomeHandle};
pub use registry::{InFlightGuard, InFlightRegistry, Reservation};
