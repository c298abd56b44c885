//! Streaming chat endpoint.
//!
//! Each text fragment the model produces is sent as an SSE `message` event. A
//! provider failure mid-stream is reported as a final `error` event carrying
//! the usual error payload; the stream then closes.
//!
//! `GET` exists for EventSource clients, which cannot send a body: the request
//! JSON travels in the `ChatData` header instead.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use tracing::{error, info};
use validator::Validate;

use super::{parse_body, respond, MessageRequest};
use crate::conversation::ConversationEngine;
use crate::error::AppError;
use crate::shared_state::AppState;

pub const CHAT_DATA_HEADER: &str = "ChatData";

/// POST /message/stream
pub async fn post_message_stream(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    let result = match parse_body(payload) {
        Ok(request) => open_stream(&state, request).await,
        Err(e) => Err(e),
    };
    respond("/message/stream", result)
}

/// GET /message/stream
pub async fn get_message_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = match request_from_header(&headers) {
        Ok(request) => open_stream(&state, request).await,
        Err(e) => Err(e),
    };
    respond("/message/stream", result)
}

fn request_from_header(headers: &HeaderMap) -> Result<MessageRequest, AppError> {
    let raw = headers
        .get(CHAT_DATA_HEADER)
        .ok_or_else(|| AppError::MalformedRequest(format!("missing {} header", CHAT_DATA_HEADER)))?
        .to_str()
        .map_err(|e| AppError::MalformedRequest(format!("unreadable {} header: {}", CHAT_DATA_HEADER, e)))?;
    serde_json::from_str(raw)
        .map_err(|e| AppError::MalformedRequest(format!("content doesn't match expected structure: {}", e)))
}

async fn open_stream(state: &AppState, request: MessageRequest) -> Result<Response, AppError> {
    request.validate()?;
    info!(user = %request.uid, "Streaming message received ({} chars)", request.chat.chars().count());

    let session = state.resolve_session(&request.uid).await?;
    let uid = request.uid;
    let events = ConversationEngine::new(session)
        .message_stream(request.chat)
        .map(move |item| -> Result<Event, Infallible> {
            match item {
                Ok(fragment) => Ok(Event::default().event("message").data(fragment)),
                Err(e) => {
                    error!(user = %uid, "Stream aborted: {}", e);
                    let payload = json!({ "error_kind": e.kind(), "message": e.to_string() });
                    Ok(Event::default().event("error").data(payload.to_string()))
                }
            }
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}
