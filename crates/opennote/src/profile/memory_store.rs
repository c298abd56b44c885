use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::{ProfileDocument, ProfileStore, UserCredentials};
use crate::error::AppError;

/// Profile store backed by a concurrent map of serialized documents.
///
/// Documents go through [`ProfileDocument`] on the way in and out, so this
/// store exercises the same mapping as the SQLite one.
#[derive(Clone, Default)]
pub struct InMemoryProfileStore {
    documents: Arc<DashMap<String, String>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find(&self, uid: &str) -> Result<Option<UserCredentials>, AppError> {
        let raw = match self.documents.get(uid) {
            Some(doc) => doc.value().clone(),
            None => return Ok(None),
        };
        ProfileDocument::from_json(&raw)?.into_credentials().map(Some)
    }

    async fn insert(&self, credentials: &UserCredentials) -> Result<(), AppError> {
        let raw = ProfileDocument::from_credentials(credentials).to_json()?;
        match self.documents.entry(credentials.uid.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::ProfileStore(format!(
                "profile {} already exists",
                credentials.uid
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(raw);
                Ok(())
            }
        }
    }

    async fn update(&self, uid: &str, credentials: &UserCredentials) -> Result<(), AppError> {
        if credentials.uid != uid {
            return Err(AppError::MalformedRequest(format!(
                "profile {} cannot be rewritten as {}",
                uid, credentials.uid
            )));
        }
        let raw = ProfileDocument::from_credentials(credentials).to_json()?;
        match self.documents.get_mut(uid) {
            Some(mut doc) => {
                *doc = raw;
                Ok(())
            }
            None => Err(AppError::ProfileStore(format!("unable to find user {}", uid))),
        }
    }
}
