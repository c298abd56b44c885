//! User profiles: the credentials record, its stored-document mapping, and the
//! collaborators that hold profiles and vouch for identities.

pub mod identity;
pub mod memory_store;
pub mod sqlite_store;

pub use identity::{HttpIdentityDirectory, IdentityDirectory, StaticIdentityDirectory};
pub use memory_store::InMemoryProfileStore;
pub use sqlite_store::SqliteProfileStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// Version written by [`ProfileDocument::from_credentials`].
pub const PROFILE_SCHEMA_VERSION: u32 = 1;

/// Result-count used for freshly created profiles.
pub const DEFAULT_TOP_K: i64 = 1;

/// Provider credentials and retrieval settings for one identity.
///
/// `uid` is the primary key everywhere (profile store, session store) and is
/// never rewritten once a profile exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct UserCredentials {
    #[validate(length(min = 1, max = 256))]
    pub uid: String,
    #[serde(default)]
    pub open_ai_api_key: String,
    #[serde(default)]
    pub pinecone_api_key: String,
    #[serde(default)]
    pub pinecone_index: String,
    #[serde(default)]
    pub pinecone_environment: String,
    #[serde(default)]
    pub pinecone_project_name: String,
    #[validate(range(min = 1))]
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Opaque access token carried by older profiles; never issued here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

impl UserCredentials {
    /// An empty profile, as created on first sign-in.
    pub fn empty(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            open_ai_api_key: String::new(),
            pinecone_api_key: String::new(),
            pinecone_index: String::new(),
            pinecone_environment: String::new(),
            pinecone_project_name: String::new(),
            top_k: DEFAULT_TOP_K,
            token: None,
        }
    }

    /// Top-K as a search parameter; validated records always have `top_k >= 1`.
    pub fn result_count(&self) -> usize {
        self.top_k.max(1) as usize
    }
}

/// The persisted shape of a profile.
///
/// This is the only place where stored documents and [`UserCredentials`] are
/// converted into each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    #[serde(flatten)]
    pub credentials: UserCredentials,
}

// Documents written before versioning carried no version field.
fn legacy_schema_version() -> u32 {
    1
}

impl ProfileDocument {
    pub fn from_credentials(credentials: &UserCredentials) -> Self {
        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            credentials: credentials.clone(),
        }
    }

    pub fn into_credentials(self) -> Result<UserCredentials, AppError> {
        if self.schema_version > PROFILE_SCHEMA_VERSION {
            return Err(AppError::ProfileStore(format!(
                "profile {} has unsupported schema version {}",
                self.credentials.uid, self.schema_version
            )));
        }
        Ok(self.credentials)
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::ProfileStore(format!("failed to encode profile: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::ProfileStore(format!("data format error: {}", e)))
    }
}

/// Document store keyed by identity id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find(&self, uid: &str) -> Result<Option<UserCredentials>, AppError>;

    /// Inserts a new profile; fails if one already exists for the identity.
    async fn insert(&self, credentials: &UserCredentials) -> Result<(), AppError>;

    /// Replaces an existing profile; fails if none exists for the identity.
    async fn update(&self, uid: &str, credentials: &UserCredentials) -> Result<(), AppError>;
}
