//! Build specification and the build runner capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;
use crate::artifact::ArtifactRef;

/// Shell-style commands for an external build, grouped by phase.
///
/// Phases run in declaration order: install, pre_build, build, post_build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub install: Vec<String>,
    pub pre_build: Vec<String>,
    pub build: Vec<String>,
    pub post_build: Vec<String>,
    /// Directory whose contents are collected as the output artifact
    /// payload.
    pub artifact_base_dir: Option<String>,
}

impl BuildSpec {
    /// Whether any phase has commands.
    pub fn is_empty(&self) -> bool {
        self.install.is_empty()
            && self.pre_build.is_empty()
            && self.build.is_empty()
            && self.post_build.is_empty()
    }
}

/// Everything a completed build hands back to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub artifacts: Vec<ArtifactRef>,
    /// Exported variables, by name.
    pub exports: HashMap<String, String>,
}

/// Trait for external build backends.
///
/// A runner executes the build spec somewhere opaque (a container, a
/// hosted build service) and reports the artifacts and exported variables
/// it produced. A conforming runner either produces everything the action
/// declared or returns an error; partial output is not a success state.
/// Side effects such as pushing an image are the runner's business and are
/// not undone on failure.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run(
        &self,
        action: &str,
        spec: &BuildSpec,
        inputs: &[ArtifactRef],
    ) -> Result<BuildOutput>;
}
