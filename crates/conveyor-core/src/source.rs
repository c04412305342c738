//! Source fetch capability.

use async_trait::async_trait;

use crate::Result;
use crate::artifact::ArtifactRef;
use crate::repository::RepositoryRef;

/// Trait for version-control backends that source actions fetch from.
///
/// Fetching is idempotent for an unchanged upstream: the same
/// owner/repo/branch resolves to an artifact with the same declared
/// contents. Implementations guarantee this by pinning the branch head
/// revision into the returned reference.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch the repository head and return a handle named `output`.
    ///
    /// Fails with [`Error::SourceUnavailable`](crate::Error) when the host
    /// is unreachable or the branch does not exist.
    async fn fetch(
        &self,
        action: &str,
        repository: &RepositoryRef,
        output: &str,
    ) -> Result<ArtifactRef>;
}
