use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AppError;

/// External authentication directory: answers "does this identity exist".
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn exists(&self, uid: &str) -> Result<bool, AppError>;
}

/// Directory reachable over HTTP at `{base_url}/{uid}`, the uid sent as one
/// percent-encoded path segment.
pub struct HttpIdentityDirectory {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpIdentityDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    async fn exists(&self, uid: &str) -> Result<bool, AppError> {
        // Dot segments would be normalized away and address the parent path.
        if uid.is_empty() || uid == "." || uid == ".." {
            return Ok(false);
        }
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| AppError::Internal(format!("invalid identity directory url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("identity directory url cannot take a path".to_string()))?
            .pop_if_empty()
            .push(uid);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("identity directory unreachable: {}", e)))?;

        let status = response.status();
        debug!("Identity directory answered {} for {}", status, uid);
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            warn!("Identity directory returned {} for {}", status, uid);
            Err(AppError::Internal(format!("identity directory returned {}", status)))
        }
    }
}

/// Fixed allow-list of identities.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityDirectory {
    identities: HashSet<String>,
}

impl StaticIdentityDirectory {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identities: identities.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl IdentityDirectory for StaticIdentityDirectory {
    async fn exists(&self, uid: &str) -> Result<bool, AppError> {
        Ok(self.identities.contains(uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory() {
        let directory = StaticIdentityDirectory::new(["u1", "u2"]);
        assert!(directory.exists("u1").await.unwrap());
        assert!(!directory.exists("u3").await.unwrap());
    }

    #[tokio::test]
    async fn test_http_directory_maps_status_codes() {
        let mut server = mockito::Server::new_async().await;
        let known = server.mock("GET", "/users/u1").with_status(200).create_async().await;
        let unknown = server.mock("GET", "/users/u2").with_status(404).create_async().await;
        let broken = server.mock("GET", "/users/u3").with_status(503).create_async().await;

        let directory = HttpIdentityDirectory::new(format!("{}/users/", server.url()), Duration::from_secs(5));

        assert!(directory.exists("u1").await.unwrap());
        assert!(!directory.exists("u2").await.unwrap());
        assert!(matches!(directory.exists("u3").await, Err(AppError::Internal(_))));

        known.assert_async().await;
        unknown.assert_async().await;
        broken.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_directory_keeps_uid_in_one_segment() {
        let mut server = mockito::Server::new_async().await;
        let known = server
            .mock("GET", "/users/u1")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let directory = HttpIdentityDirectory::new(format!("{}/users", server.url()), Duration::from_secs(5));

        assert!(directory.exists("u1").await.unwrap());
        for forged in ["u1#evil", "u1?impostor", "u1/../u1", "u1%2F"] {
            assert!(
                !matches!(directory.exists(forged).await, Ok(true)),
                "{} resolved to a known identity",
                forged
            );
        }
        assert!(!directory.exists("..").await.unwrap());
        assert!(!directory.exists(".").await.unwrap());
        known.assert_async().await;
    }
}
