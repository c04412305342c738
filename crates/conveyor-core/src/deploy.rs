//! Deploy target description and the deployer capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;
use crate::artifact::ArtifactRef;

/// Where a deploy action lands its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    /// Template path inside one of the action's input artifacts.
    pub template_path: String,
    /// Name of the deployment target (stack, stage, service).
    pub target: String,
}

impl DeployTarget {
    pub fn new(template_path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            template_path: template_path.into(),
            target: target.into(),
        }
    }
}

/// Handle to a deployment created by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHandle {
    /// Action that performed the deployment.
    pub action: String,
    /// Target it deployed to.
    pub target: String,
    /// Backend-specific identifier for the created deployment.
    pub location: String,
}

/// Trait for deployment backends.
///
/// The parameter map is fully resolved by the time this is called:
/// variable references have already been substituted with run-time values.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        action: &str,
        target: &DeployTarget,
        inputs: &[ArtifactRef],
        parameters: &BTreeMap<String, String>,
    ) -> Result<DeploymentHandle>;
}
