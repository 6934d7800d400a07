//! Router for the chat API

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::post,
};
use http::{HeaderValue, header};
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use super::public;
use crate::api::public::ApiError;
use crate::api::state::AppState;
use crate::openai::Message;

type SharedState = Arc<AppState>;

/// Relay the conversation to the model and stream the reply back as
/// plain text
async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<public::ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    use crate::api::utils::DetectDisconnect;

    let Json(payload) = payload.map_err(|rejection| {
        tracing::debug!("Rejected chat request body: {}", rejection.body_text());
        ApiError::BadRequest("invalid request body")
    })?;

    if payload.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty"));
    }

    let request_id = Uuid::new_v4();
    let mut conversation: Vec<Message> = payload.messages.into_iter().map(Message::from).collect();

    if state.format_rules.apply(payload.format, &mut conversation) {
        tracing::debug!(%request_id, "Asked model for html formatted response");
    }
    tracing::info!(
        %request_id,
        messages = conversation.len(),
        "Relaying chat to model"
    );

    let stream = state.relay.start(conversation).await?;

    let body = DetectDisconnect::new(stream, request_id).map(move |chunk| {
        chunk.inspect_err(|e| {
            tracing::error!(%request_id, "Chat stream failed after response started: {}", e)
        })
    });

    let mut resp = Body::from_stream(body).into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    // Model output is untrusted, don't let browsers sniff it as html
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Ok(resp)
}

/// Create the chat router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(chat_handler))
}
