//! Credential lookup collaborator.
//!
//! Backend authentication material is resolved per task execution and never
//! cached beyond it. Cloud tasks additionally derive short-lived credentials
//! that must be revoked during cancellation cleanup.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CredentialError {
    #[error("credential not found for token {token}")]
    NotFound { token: String },

    #[error("credential service unreachable: {0}")]
    Unreachable(String),
}

/// Username/secret pair for backend authentication.
#[derive(Debug, Clone)]
pub struct PasswordCredential {
    pub username: String,
    pub secret: String,
}

#[async_trait]
pub trait CredentialClient: Send + Sync {
    /// Resolve the credential behind a token, scoped to its owner.
    async fn password_credential(
        &self,
        token: &str,
        owner: &str,
    ) -> Result<PasswordCredential, CredentialError>;

    /// Revoke a derived short-lived credential. Called from cancellation
    /// cleanup; failures are logged by the caller, never re-thrown.
    async fn revoke_derived(&self, token: &str) -> Result<(), CredentialError>;
}

/// In-memory credential service for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCredentialClient {
    credentials: DashMap<String, PasswordCredential>,
    revoked: DashMap<String, ()>,
}

impl InMemoryCredentialClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, credential: PasswordCredential) {
        self.credentials.insert(token.into(), credential);
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.contains_key(token)
    }
}

#[async_trait]
impl CredentialClient for InMemoryCredentialClient {
    async fn password_credential(
        &self,
        token: &str,
        _owner: &str,
    ) -> Result<PasswordCredential, CredentialError> {
        self.credentials
            .get(token)
            .map(|entry| entry.clone())
            .ok_or_else(|| CredentialError::NotFound {
                token: token.to_string(),
            })
    }

    async fn revoke_derived(&self, token: &str) -> Result<(), CredentialError> {
        self.revoked.insert(token.to_string(), ());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_and_revoke() {
        let client = InMemoryCredentialClient::new();
        client.insert(
            "token-1",
            PasswordCredential {
                username: "alice".to_string(),
                secret: "s3cret".to_string(),
            },
        );

        let credential = client.password_credential("token-1", "alice").await.unwrap();
        assert_eq!(credential.username, "alice");

        assert!(client.password_credential("missing", "alice").await.is_err());

        client.revoke_derived("token-1").await.unwrap();
        assert!(client.is_revoked("token-1"));
    }
}
