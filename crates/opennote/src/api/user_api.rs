//! Profile endpoints used by the web frontend.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use validator::Validate;

use super::{parse_body, respond};
use crate::error::AppError;
use crate::metrics;
use crate::profile::UserCredentials;
use crate::shared_state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UidRequest {
    #[validate(length(min = 1))]
    pub uid: String,
}

/// POST /api/createEmptyUser
///
/// Creates a `top_k = 1` profile unless one exists. Both cases answer 201.
pub async fn create_empty_user(
    State(state): State<AppState>,
    payload: Result<Json<UidRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let request = parse_body(payload)?;
        request.validate()?;
        state.require_identity(&request.uid).await?;

        if state.profiles.find(&request.uid).await?.is_some() {
            debug!(user = %request.uid, "Profile already exists");
            return Ok(StatusCode::CREATED);
        }
        state.profiles.insert(&UserCredentials::empty(&request.uid)).await?;
        info!(user = %request.uid, "Created empty profile");
        Ok::<_, AppError>(StatusCode::CREATED)
    }
    .await;
    respond("/api/createEmptyUser", result)
}

/// POST /api/getUser
pub async fn get_user(
    State(state): State<AppState>,
    payload: Result<Json<UidRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let request = parse_body(payload)?;
        request.validate()?;
        state.require_identity(&request.uid).await?;

        let profile = state
            .profiles
            .find(&request.uid)
            .await?
            .ok_or_else(|| AppError::ProfileStore(format!("unable to find profile for {}", request.uid)))?;
        Ok::<_, AppError>(Json(profile))
    }
    .await;
    respond("/api/getUser", result)
}

/// POST /api/updateUser
///
/// Writes the profile, then refreshes the credentials of a live session.
pub async fn update_user(
    State(state): State<AppState>,
    payload: Result<Json<UserCredentials>, JsonRejection>,
) -> Response {
    let result = async {
        let credentials = parse_body(payload)?;
        credentials.validate()?;

        state.profiles.update(&credentials.uid, &credentials).await?;
        let live = state.sessions.update_profile(&credentials.uid, credentials.clone()).await?;
        info!(user = %credentials.uid, live_session = live, "Profile updated");
        Ok::<_, AppError>(StatusCode::OK)
    }
    .await;
    respond("/api/updateUser", result)
}

/// POST /api/validateCredentials
///
/// Checks the submitted credentials against both providers without creating
/// a session. Rejections answer 401 with the failing side.
pub async fn validate_credentials(
    State(state): State<AppState>,
    payload: Result<Json<UserCredentials>, JsonRejection>,
) -> Response {
    let result = async {
        let credentials = parse_body(payload)?;
        credentials.validate()?;

        if state.profiles.find(&credentials.uid).await?.is_none() {
            return Err(AppError::ProfileStore(format!(
                "unable to find profile for {}",
                credentials.uid
            )));
        }
        state.validator.validate(&credentials).await?;
        Ok(StatusCode::OK)
    }
    .await;

    match result {
        Err(e @ AppError::CredentialsInvalid(_)) => {
            warn!("/api/validateCredentials rejected: {}", e);
            let mut response = e.into_response();
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            metrics::inc_request("/api/validateCredentials", response.status().as_str());
            response
        }
        other => respond("/api/validateCredentials", other),
    }
}
