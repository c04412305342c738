//! Pipeline execution for Conveyor.
//!
//! Runs validated pipeline definitions against source, build, and deploy
//! backends: stages strictly in declared order, actions within a stage
//! concurrently, with exported variables carried across stages into deploy
//! parameters.

pub mod orchestrator;
pub mod vars;

pub use orchestrator::{
    ActionFailure, PipelineRunner, RunEvent, RunHandle, RunReport, RunStatus, StageOutcome,
    StageReport,
};
pub use vars::VariableTable;
