//! `POST /message`: one conversation turn, answered as plain text.

use axum::{extract::rejection::JsonRejection, extract::State, response::Response, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::{parse_body, respond};
use crate::conversation::ConversationEngine;
use crate::error::AppError;
use crate::shared_state::AppState;

/// Body of the chat endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MessageRequest {
    #[validate(length(min = 1))]
    pub uid: String,
    /// What the user typed.
    #[validate(length(min = 1))]
    pub chat: String,
}

pub async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    respond("/message", handle_message(&state, payload).await)
}

async fn handle_message(
    state: &AppState,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<String, AppError> {
    let request = parse_body(payload)?;
    request.validate()?;
    info!(user = %request.uid, "Message received ({} chars)", request.chat.chars().count());

    let session = state.resolve_session(&request.uid).await?;
    ConversationEngine::new(session).message(&request.chat).await
}
