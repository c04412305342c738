//! Error types for Conveyor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The upstream repository could not be reached or the branch does not
    /// exist.
    #[error("source unavailable in action '{action}': {reason}")]
    SourceUnavailable { action: String, reason: String },

    /// The external build failed, or did not produce everything it declared.
    #[error("build failed in action '{action}': {reason}")]
    BuildFailed { action: String, reason: String },

    /// The deploy target rejected the template or resolved parameters.
    #[error("deploy failed in action '{action}': {reason}")]
    DeployFailed { action: String, reason: String },

    /// A deploy parameter references a variable no earlier action exports.
    /// Raised by the construction-time checker; a definition carrying one
    /// of these never starts running.
    #[error(
        "unresolved variable reference '{producer}.{variable}' in action '{action}': {reason}"
    )]
    UnresolvedVariableReference {
        action: String,
        producer: String,
        variable: String,
        reason: String,
    },

    /// A build action declared an export but never produced it, discovered
    /// when a deploy action asked for the value. Fatal to that action.
    #[error("missing exported variable '{producer}.{variable}' required by action '{action}'")]
    MissingExportedVariable {
        action: String,
        producer: String,
        variable: String,
    },

    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
