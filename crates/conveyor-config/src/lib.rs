//! KDL configuration parsing for Conveyor.
//!
//! Turns a pipeline definition file into a validated
//! [`Pipeline`](conveyor_core::pipeline::Pipeline); every structural check
//! of the core constructor applies to loaded definitions too.

pub mod error;
pub mod pipeline;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::parse_pipeline;
