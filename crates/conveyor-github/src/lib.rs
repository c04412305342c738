//! GitHub source backend for Conveyor.

use std::sync::Arc;

use async_trait::async_trait;
use conveyor_core::artifact::ArtifactRef;
use conveyor_core::repository::RepositoryRef;
use conveyor_core::secret::SecretStore;
use conveyor_core::source::SourceProvider;
use conveyor_core::{Error, Result};
use serde::Deserialize;
use tracing::info;

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Source provider backed by the GitHub REST API.
///
/// Resolves a branch to its head commit so that the returned artifact is
/// pinned: re-fetching an unchanged branch yields the same reference.
/// Tokens are looked up through the secret store per fetch; the literal
/// value never leaves this provider.
pub struct GitHubSource {
    client: reqwest::Client,
    api_base: String,
    secrets: Arc<dyn SecretStore>,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

impl GitHubSource {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_api_base(secrets, DEFAULT_API_BASE)
    }

    /// Point at a different API host (GitHub Enterprise, a test double).
    pub fn with_api_base(secrets: Arc<dyn SecretStore>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secrets,
        }
    }

    fn branch_url(&self, repository: &RepositoryRef) -> String {
        format!(
            "{}/repos/{}/{}/branches/{}",
            self.api_base, repository.owner, repository.repo, repository.branch
        )
    }

    fn tarball_url(&self, repository: &RepositoryRef, sha: &str) -> String {
        format!(
            "{}/repos/{}/{}/tarball/{}",
            self.api_base, repository.owner, repository.repo, sha
        )
    }
}

#[async_trait]
impl SourceProvider for GitHubSource {
    async fn fetch(
        &self,
        action: &str,
        repository: &RepositoryRef,
        output: &str,
    ) -> Result<ArtifactRef> {
        let unavailable = |reason: String| Error::SourceUnavailable {
            action: action.to_string(),
            reason,
        };

        let token = self.secrets.get(&repository.token).await?;
        let response = self
            .client
            .get(self.branch_url(repository))
            .header("Authorization", format!("Bearer {token}"))
            .header("User-Agent", "conveyor")
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(unavailable(format!(
                "branch '{}' not found in {}",
                repository.branch,
                repository.full_name()
            )));
        }
        if !response.status().is_success() {
            return Err(unavailable(format!(
                "GitHub returned {} for {}",
                response.status(),
                repository.full_name()
            )));
        }

        let branch: BranchResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("malformed branch response: {e}")))?;

        info!(
            action = %action,
            repository = %repository.full_name(),
            sha = %branch.commit.sha,
            "Resolved branch head"
        );

        Ok(ArtifactRef {
            name: output.to_string(),
            location: self.tarball_url(repository, &branch.commit.sha),
            checksum: Some(branch.commit.sha),
            size: None,
        })
    }
}
