//! SQLite-backed profile store.
//!
//! One row per identity holding the JSON document produced by
//! [`ProfileDocument`]. rusqlite is synchronous, so every query runs on the
//! blocking pool.

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ProfileDocument, ProfileStore, UserCredentials};
use crate::error::AppError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    uid TEXT PRIMARY KEY NOT NULL,
    schema_version INTEGER NOT NULL,
    document TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

type SqlitePool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct SqliteProfileStore {
    pool: Arc<SqlitePool>,
}

impl SqliteProfileStore {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening profile database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            );
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        info!("Profile database initialized successfully");
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn new_in_memory() -> anyhow::Result<Self> {
        // A single connection: every pooled `:memory:` connection would be its own database.
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        Ok(Self { pool: Arc::new(pool) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, AppError> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| AppError::ProfileStore(format!("failed to get connection from pool: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("profile store task failed: {}", e)))?
    }
}

fn sql_error(err: rusqlite::Error) -> AppError {
    AppError::ProfileStore(err.to_string())
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn find(&self, uid: &str) -> Result<Option<UserCredentials>, AppError> {
        let uid = uid.to_string();
        let raw = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT document FROM profiles WHERE uid = ?1",
                    [&uid],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(sql_error)
            })
            .await?;

        match raw {
            Some(raw) => ProfileDocument::from_json(&raw)?.into_credentials().map(Some),
            None => Ok(None),
        }
    }

    async fn insert(&self, credentials: &UserCredentials) -> Result<(), AppError> {
        let doc = ProfileDocument::from_credentials(credentials);
        let raw = doc.to_json()?;
        let uid = credentials.uid.clone();
        let version = doc.schema_version;

        self.with_conn(move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO profiles (uid, schema_version, document, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![&uid, version, &raw, &now],
                )
                .map_err(sql_error)?;
            if inserted == 0 {
                return Err(AppError::ProfileStore(format!("profile {} already exists", uid)));
            }
            debug!("Inserted profile {}", uid);
            Ok(())
        })
        .await
    }

    async fn update(&self, uid: &str, credentials: &UserCredentials) -> Result<(), AppError> {
        if credentials.uid != uid {
            return Err(AppError::MalformedRequest(format!(
                "profile {} cannot be rewritten as {}",
                uid, credentials.uid
            )));
        }
        let doc = ProfileDocument::from_credentials(credentials);
        let raw = doc.to_json()?;
        let uid = uid.to_string();
        let version = doc.schema_version;

        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE profiles SET schema_version = ?2, document = ?3, updated_at = ?4 WHERE uid = ?1",
                    params![&uid, version, &raw, chrono::Utc::now().to_rfc3339()],
                )
                .map_err(sql_error)?;
            if updated == 0 {
                return Err(AppError::ProfileStore(format!("unable to find user {}", uid)));
            }
            debug!("Updated profile {}", uid);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(uid: &str) -> UserCredentials {
        let mut creds = UserCredentials::empty(uid);
        creds.open_ai_api_key = "sk-test".to_string();
        creds.pinecone_api_key = "pc-test".to_string();
        creds.pinecone_index = "notes".to_string();
        creds.pinecone_environment = "us-west1-gcp".to_string();
        creds.pinecone_project_name = "abc123".to_string();
        creds.top_k = 2;
        creds
    }

    #[tokio::test]
    async fn test_profiles_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("profiles.db");

        {
            let store = SqliteProfileStore::new(&path).unwrap();
            store.insert(&sample("u1")).await.unwrap();
        }

        let reopened = SqliteProfileStore::new(&path).unwrap();
        assert_eq!(reopened.find("u1").await.unwrap(), Some(sample("u1")));
    }

    #[tokio::test]
    async fn test_insert_is_not_an_upsert() {
        let store = SqliteProfileStore::new_in_memory().unwrap();
        store.insert(&sample("u1")).await.unwrap();

        let mut changed = sample("u1");
        changed.top_k = 9;
        assert!(store.insert(&changed).await.is_err());
        assert_eq!(store.find("u1").await.unwrap().unwrap().top_k, 2);
    }

    #[tokio::test]
    async fn test_update_missing_profile_fails() {
        let store = SqliteProfileStore::new_in_memory().unwrap();
        let err = store.update("ghost", &sample("ghost")).await.unwrap_err();
        assert!(matches!(err, AppError::ProfileStore(_)));
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let store = SqliteProfileStore::new_in_memory().unwrap();
        store.insert(&UserCredentials::empty("u1")).await.unwrap();

        store.update("u1", &sample("u1")).await.unwrap();
        let once = store.find("u1").await.unwrap();
        store.update("u1", &sample("u1")).await.unwrap();
        let twice = store.find("u1").await.unwrap();

        assert_eq!(once, twice);
    }
}
