//! HTTP handlers.

pub mod message_api;
pub mod stream_api;
pub mod user_api;

pub use message_api::{post_message, MessageRequest};
pub use stream_api::{get_message_stream, post_message_stream};
pub use user_api::{create_empty_user, get_user, update_user, validate_credentials, UidRequest};

use axum::{
    extract::rejection::JsonRejection,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::error::AppError;
use crate::metrics;

/// Unwraps a JSON body, mapping extractor rejections into the error taxonomy.
pub(crate) fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::MalformedRequest(rejection.body_text()))
}

/// Turns a handler result into a response and counts it.
pub(crate) fn respond<T: IntoResponse>(route: &'static str, result: Result<T, AppError>) -> Response {
    let response = match result {
        Ok(body) => body.into_response(),
        Err(e) => {
            if e.status().is_server_error() {
                error!("{} failed: {}", route, e);
            } else {
                warn!("{} rejected: {}", route, e);
            }
            e.into_response()
        }
    };
    metrics::inc_request(route, response.status().as_str());
    response
}
