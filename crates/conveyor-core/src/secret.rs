//! Secret handles and storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Names a secret held outside the pipeline definition.
///
/// Definitions carry only the handle; the literal value is looked up
/// through a [`SecretStore`] when an action needs it and is never
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretHandle(String);

impl SecretHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve a handle to the secret value.
    async fn get(&self, handle: &SecretHandle) -> Result<String>;
}

/// Secret store backed by process environment variables.
///
/// Handle names map to environment variable names verbatim.
#[derive(Debug, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, handle: &SecretHandle) -> Result<String> {
        std::env::var(handle.name()).map_err(|_| Error::SecretNotFound(handle.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn env_store_resolves_and_reports_missing() {
        // SAFETY: test-local variable, no concurrent reader cares.
        unsafe { std::env::set_var("CONVEYOR_TEST_TOKEN", "tok-123") };

        let store = EnvSecretStore;
        let value = store.get(&SecretHandle::new("CONVEYOR_TEST_TOKEN")).await;
        assert_eq!(value.unwrap(), "tok-123");

        let missing = store.get(&SecretHandle::new("CONVEYOR_TEST_ABSENT")).await;
        assert!(matches!(missing, Err(Error::SecretNotFound(_))));
    }
}
