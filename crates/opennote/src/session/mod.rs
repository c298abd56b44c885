//! Per-identity conversational state.
//!
//! Locking is two-tier. The [`SessionStore`] map guards only structural
//! operations (insert, remove, lookup) and its guards are never held across an
//! `.await`. Each [`Session`] guards its own credentials and transcript. The
//! store is never entered while a session lock is held.

pub mod lifecycle;
pub mod store;

pub use lifecycle::spawn_session_sweeper;
pub use store::SessionStore;

use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::SessionSettings;
use crate::conversation::{Message, Transcript};
use crate::profile::UserCredentials;
use crate::providers::ProviderClients;

pub struct Session {
    identity: String,
    credentials: RwLock<UserCredentials>,
    clients: ProviderClients,
    transcript: Mutex<Transcript>,
    expires_at: StdMutex<Instant>,
    idle_window: Duration,
}

impl Session {
    pub fn new(credentials: UserCredentials, clients: ProviderClients, settings: &SessionSettings) -> Self {
        Self {
            identity: credentials.uid.clone(),
            credentials: RwLock::new(credentials),
            clients,
            transcript: Mutex::new(Transcript::new(settings.transcript_char_budget)),
            expires_at: StdMutex::new(Instant::now() + settings.idle_window),
            idle_window: settings.idle_window,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Clients bound at creation. Credential updates do not rebuild them.
    pub fn clients(&self) -> &ProviderClients {
        &self.clients
    }

    pub async fn credentials(&self) -> UserCredentials {
        self.credentials.read().await.clone()
    }

    pub async fn top_k(&self) -> usize {
        self.credentials.read().await.result_count()
    }

    pub(crate) async fn replace_credentials(&self, credentials: UserCredentials) {
        *self.credentials.write().await = credentials;
    }

    pub(crate) fn transcript(&self) -> &Mutex<Transcript> {
        &self.transcript
    }

    pub async fn history(&self) -> Vec<Message> {
        self.transcript.lock().await.snapshot()
    }

    /// Pushes expiry to now plus the idle window.
    pub fn touch(&self) {
        let deadline = Instant::now() + self.idle_window;
        *self.expires_at.lock().unwrap_or_else(|e| e.into_inner()) = deadline;
    }

    pub fn expires_at(&self) -> Instant {
        *self.expires_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}
