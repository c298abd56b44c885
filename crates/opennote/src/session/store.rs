use dashmap::{mapref::entry::Entry, DashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info};
use validator::Validate;

use super::Session;
use crate::config::SessionSettings;
use crate::error::AppError;
use crate::metrics;
use crate::profile::UserCredentials;
use crate::validation::CredentialValidator;

/// A reserved entry. Empty while the session is being validated.
type Slot = Arc<OnceCell<Arc<Session>>>;

/// Owns every live session, keyed by identity id.
pub struct SessionStore {
    slots: DashMap<String, Slot>,
    validator: CredentialValidator,
    settings: SessionSettings,
}

impl SessionStore {
    pub fn new(validator: CredentialValidator, settings: SessionSettings) -> Self {
        Self {
            slots: DashMap::new(),
            validator,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Live, fully built sessions. Reservations still validating are not counted.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live session for `id`. An expired session that the sweeper
    /// has not reached yet counts as absent and is dropped here.
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let slot = self.slots.get(id)?.value().clone();
        let session = slot.get()?.clone();

        if session.is_expired(Instant::now()) {
            if self.evict(id, &slot) {
                info!(user = %id, "Session expired");
            }
            return None;
        }
        Some(session)
    }

    /// Returns the cached session, or reserves the slot and builds one.
    ///
    /// `fetch` is only called when no session exists. Building validates the
    /// credentials against both providers; on failure the reservation is
    /// released so nothing half-built stays cached. Concurrent callers for the
    /// same identity wait on the same reservation.
    pub async fn get_or_create<F, Fut>(&self, id: &str, fetch: F) -> Result<Arc<Session>, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<UserCredentials, AppError>>,
    {
        if let Some(session) = self.lookup(id) {
            return Ok(session);
        }

        let slot = self
            .slots
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let created = AtomicBool::new(false);
        let created_flag = &created;
        let built = slot
            .get_or_try_init(|| async move {
                let credentials = fetch().await?;
                if credentials.uid != id {
                    return Err(AppError::MalformedRequest(format!(
                        "profile for {} carries uid {}",
                        id, credentials.uid
                    )));
                }
                credentials.validate()?;

                let clients = self.validator.validate(&credentials).await?;
                created_flag.store(true, Ordering::SeqCst);
                Ok::<_, AppError>(Arc::new(Session::new(credentials, clients, &self.settings)))
            })
            .await;

        match built {
            Ok(session) => {
                let (session, registered_ours) = self.register(id, &slot, session.clone());
                if registered_ours && created.load(Ordering::SeqCst) {
                    metrics::inc_sessions();
                    info!(user = %id, "Session created");
                }
                Ok(session)
            }
            Err(e) => {
                self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
                debug!(user = %id, error = %e, "Session creation failed, reservation released");
                Err(e)
            }
        }
    }

    /// Makes sure the session handed back is the one the map holds.
    ///
    /// `slot` can be orphaned when an earlier build on it failed and released
    /// the entry; another caller may have reserved a fresh slot meanwhile. A
    /// live built session in the map wins; an empty or expired entry is taken
    /// over. The flag reports whether `slot` is the registered one.
    fn register(&self, id: &str, slot: &Slot, session: Arc<Session>) -> (Arc<Session>, bool) {
        match self.slots.entry(id.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(slot.clone());
                (session, true)
            }
            Entry::Occupied(mut entry) => {
                if Arc::ptr_eq(entry.get(), slot) {
                    return (session, true);
                }
                let current = entry.get().get().cloned();
                match current {
                    Some(current) if !current.is_expired(Instant::now()) => {
                        debug!(user = %id, "Discarding duplicate session build");
                        (current, false)
                    }
                    Some(_) => {
                        entry.insert(slot.clone());
                        metrics::dec_sessions();
                        metrics::inc_evicted(1);
                        (session, true)
                    }
                    None => {
                        entry.insert(slot.clone());
                        (session, true)
                    }
                }
            }
        }
    }

    /// Replaces the cached credentials of a live session in place.
    ///
    /// Provider clients bound at creation are kept; a rotated key reaches them
    /// only when the session is recreated. Returns whether a session was found.
    pub async fn update_profile(&self, id: &str, credentials: UserCredentials) -> Result<bool, AppError> {
        if credentials.uid != id {
            return Err(AppError::MalformedRequest(format!(
                "uid {} cannot be changed to {}",
                id, credentials.uid
            )));
        }
        credentials.validate()?;

        let Some(session) = self.lookup(id) else {
            return Ok(false);
        };
        session.replace_credentials(credentials).await;
        debug!(user = %id, "Session credentials updated");
        Ok(true)
    }

    /// Removes every expired session. Returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.slots.retain(|id, slot| {
            let expired = slot.get().map(|s| s.is_expired(now)).unwrap_or(false);
            if expired {
                evicted.push(id.clone());
            }
            !expired
        });

        for id in &evicted {
            info!(user = %id, "Session evicted after idle timeout");
            metrics::dec_sessions();
        }
        metrics::inc_evicted(evicted.len());
        evicted.len()
    }

    fn evict(&self, id: &str, slot: &Slot) -> bool {
        let removed = self
            .slots
            .remove_if(id, |_, current| Arc::ptr_eq(current, slot))
            .is_some();
        if removed {
            metrics::dec_sessions();
            metrics::inc_evicted(1);
        }
        removed
    }
}
