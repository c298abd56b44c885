//! State shared by every HTTP handler.
//!
//! Everything here is behind an `Arc`; cloning `AppState` per request is cheap.

use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::AppError,
    profile::{IdentityDirectory, ProfileStore},
    providers::ProviderFactory,
    session::{Session, SessionStore},
    validation::CredentialValidator,
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub identities: Arc<dyn IdentityDirectory>,
    pub validator: CredentialValidator,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        profiles: Arc<dyn ProfileStore>,
        identities: Arc<dyn IdentityDirectory>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        let validator = CredentialValidator::new(factory);
        let sessions = Arc::new(SessionStore::new(validator.clone(), config.session_settings()));
        Self {
            sessions,
            profiles,
            identities,
            validator,
            config: Arc::new(config),
        }
    }

    /// Live session for `uid`, creating one from the stored profile if needed.
    ///
    /// Unknown identities and missing profiles are rejected before any
    /// provider is contacted.
    pub async fn resolve_session(&self, uid: &str) -> Result<Arc<Session>, AppError> {
        if let Some(session) = self.sessions.lookup(uid) {
            return Ok(session);
        }

        self.require_identity(uid).await?;
        info!(user = %uid, "No live session, creating one");
        let profiles = self.profiles.clone();
        self.sessions
            .get_or_create(uid, || async move {
                profiles
                    .find(uid)
                    .await?
                    .ok_or_else(|| AppError::ProfileStore(format!("unable to find profile for {}", uid)))
            })
            .await
    }

    pub async fn require_identity(&self, uid: &str) -> Result<(), AppError> {
        if uid.is_empty() {
            return Err(AppError::MalformedRequest("empty uid".to_string()));
        }
        if !self.identities.exists(uid).await? {
            debug!(user = %uid, "Identity directory does not know this user");
            return Err(AppError::IdentityNotFound(uid.to_string()));
        }
        Ok(())
    }
}
