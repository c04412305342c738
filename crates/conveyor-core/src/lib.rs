//! Core domain types and traits for the Conveyor pipeline orchestrator.
//!
//! This crate contains:
//! - Run identifiers and error types
//! - The pipeline definition model (pipelines, stages, actions, artifacts)
//! - The construction-time reference checker
//! - Capability traits for the external systems actions drive
//!   (source hosts, build runners, deploy targets)
//! - Secret handles and storage

pub mod action;
pub mod artifact;
pub mod build;
pub mod deploy;
pub mod error;
pub mod id;
pub mod pipeline;
pub mod repository;
pub mod secret;
pub mod source;
mod validate;

pub use error::{Error, Result};
pub use id::RunId;
