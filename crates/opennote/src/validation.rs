//! Credential validation: both providers must accept a user's credentials
//! before a session is built from them. One attempt each, no retries.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AppError, CredentialFailure};
use crate::metrics;
use crate::profile::UserCredentials;
use crate::providers::{ProviderClients, ProviderFactory};

#[derive(Clone)]
pub struct CredentialValidator {
    factory: Arc<dyn ProviderFactory>,
}

impl CredentialValidator {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self { factory }
    }

    /// Builds clients for `credentials` and checks them against both providers.
    ///
    /// On success the checked clients are returned so the caller can bind them
    /// to a session without rebuilding.
    pub async fn validate(&self, credentials: &UserCredentials) -> Result<ProviderClients, AppError> {
        let clients = self.factory.build(credentials)?;
        check_clients(&credentials.uid, &clients).await?;
        Ok(clients)
    }
}

/// Chat provider first (list models), then the vector index (describe stats).
pub async fn check_clients(uid: &str, clients: &ProviderClients) -> Result<(), AppError> {
    if let Err(e) = clients.chat.list_models().await {
        warn!(user = %uid, error = %e, "Invalid chat-completion API key");
        return Err(reject(CredentialFailure::ChatProvider));
    }

    if let Err(e) = clients.index.describe_stats().await {
        warn!(user = %uid, error = %e, "Invalid vector index credentials");
        return Err(reject(CredentialFailure::VectorProvider));
    }

    debug!(user = %uid, "Provider credentials accepted");
    Ok(())
}

fn reject(side: CredentialFailure) -> AppError {
    metrics::inc_credential_failure(side.as_str());
    AppError::CredentialsInvalid(side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProviderFactory, ProviderScript};

    fn validator(script: ProviderScript) -> (CredentialValidator, Arc<FakeProviderFactory>) {
        let factory = Arc::new(FakeProviderFactory::new(script));
        (CredentialValidator::new(factory.clone()), factory)
    }

    #[tokio::test]
    async fn test_valid_credentials_return_clients() {
        let (validator, factory) = validator(ProviderScript::default());
        assert!(validator.validate(&UserCredentials::empty("u1")).await.is_ok());
        assert_eq!(factory.builds(), 1);
    }

    #[tokio::test]
    async fn test_chat_rejection_is_reported_first() {
        let (validator, factory) = validator(ProviderScript {
            chat_key_valid: false,
            index_key_valid: false,
            ..Default::default()
        });
        let err = validator.validate(&UserCredentials::empty("u1")).await.unwrap_err();
        assert_eq!(err.credential_failure(), Some(CredentialFailure::ChatProvider));
        // The vector index is not consulted once the chat key is rejected.
        assert_eq!(factory.index().describe_calls(), 0);
    }

    #[tokio::test]
    async fn test_vector_rejection_is_distinguished() {
        let (validator, _) = validator(ProviderScript {
            index_key_valid: false,
            ..Default::default()
        });
        let err = validator.validate(&UserCredentials::empty("u1")).await.unwrap_err();
        assert_eq!(err.credential_failure(), Some(CredentialFailure::VectorProvider));
    }

    #[tokio::test]
    async fn test_no_retries() {
        let (validator, factory) = validator(ProviderScript {
            chat_key_valid: false,
            ..Default::default()
        });
        let _ = validator.validate(&UserCredentials::empty("u1")).await;
        assert_eq!(factory.chat().list_models_calls(), 1);
    }
}
