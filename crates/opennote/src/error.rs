//! Error taxonomy shared by the session core and the HTTP layer.
//!
//! Every failure surfaced to a caller is an [`AppError`]. The HTTP layer turns
//! it into a `{"error_kind", "message"}` payload; a successful chat reply is
//! plain text, so clients tell the two apart by status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Which provider rejected a candidate set of credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialFailure {
    ChatProvider,
    VectorProvider,
}

impl CredentialFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialFailure::ChatProvider => "chat_provider",
            CredentialFailure::VectorProvider => "vector_provider",
        }
    }
}

impl std::fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialFailure::ChatProvider => write!(f, "chat-completion provider rejected the API key"),
            CredentialFailure::VectorProvider => write!(f, "vector index rejected the connection parameters"),
        }
    }
}

/// Stable, serializable error kind reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    IdentityNotFound,
    MalformedRequest,
    ProfileStoreError,
    ChatProviderError,
    VectorProviderError,
    CredentialsInvalid,
    InternalError,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("identity {0} does not exist")]
    IdentityNotFound(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("profile store error: {0}")]
    ProfileStore(String),

    #[error("chat provider error: {0}")]
    ChatProvider(String),

    #[error("vector provider error: {0}")]
    VectorProvider(String),

    #[error("invalid credentials: {0}")]
    CredentialsInvalid(CredentialFailure),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::IdentityNotFound(_) => ErrorKind::IdentityNotFound,
            AppError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            AppError::ProfileStore(_) => ErrorKind::ProfileStoreError,
            AppError::ChatProvider(_) => ErrorKind::ChatProviderError,
            AppError::VectorProvider(_) => ErrorKind::VectorProviderError,
            AppError::CredentialsInvalid(_) => ErrorKind::CredentialsInvalid,
            AppError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::IdentityNotFound(_) | AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ProfileStore(_) => StatusCode::NOT_FOUND,
            AppError::CredentialsInvalid(_) => StatusCode::EXPECTATION_FAILED,
            AppError::ChatProvider(_) | AppError::VectorProvider(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Side indicator for credential failures, `None` for every other kind.
    pub fn credential_failure(&self) -> Option<CredentialFailure> {
        match self {
            AppError::CredentialsInvalid(side) => Some(*side),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::MalformedRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error_kind": self.kind(),
            "message": self.to_string(),
        });
        if let Some(side) = self.credential_failure() {
            body["credential_failure"] = json!(side);
        }
        (self.status(), Json(body)).into_response()
    }
}
