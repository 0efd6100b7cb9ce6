//! Request orchestration
//!
//! - [`ports::Transport`]: the wire boundary
//! - [`RequestPipelineBuilder`]: validated assembly of a pipeline
//! - [`RequestPipeline`]: the `call` entry point and session surface

pub mod builder;
pub mod ports;
pub mod service;

pub use builder::RequestPipelineBuilder;
pub use ports::Transport;
pub use service::RequestPipeline;
