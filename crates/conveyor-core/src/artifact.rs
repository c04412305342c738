//! Artifact references passed between actions.

use serde::{Deserialize, Serialize};

/// Handle to an artifact produced by a completed action.
///
/// The payload itself lives wherever the producing backend put it (an
/// object store, a registry, a tarball URL); the orchestrator only carries
/// the handle from the producer to its consumers. Handles are never
/// mutated after production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Artifact name as declared in the pipeline definition.
    pub name: String,
    /// Backend-specific location of the payload.
    pub location: String,
    /// Content revision or hash, if the backend knows one.
    pub checksum: Option<String>,
    /// Size in bytes, if known.
    pub size: Option<u64>,
}

impl ArtifactRef {
    /// A handle with only a name and location.
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            checksum: None,
            size: None,
        }
    }
}
