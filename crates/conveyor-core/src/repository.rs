//! Upstream repository references consumed by source actions.

use serde::{Deserialize, Serialize};

use crate::secret::SecretHandle;

/// Identifies the version-control upstream of a source action.
///
/// Supplied at pipeline construction, not owned by the pipeline. The token
/// is a secret handle; the literal credential never appears in a persisted
/// definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: SecretHandle,
}

impl RepositoryRef {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: SecretHandle,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            token,
        }
    }

    /// "owner/repo" form used in logs and error messages.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}
