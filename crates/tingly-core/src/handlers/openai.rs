use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use http::HeaderMap;

use tingly_transform::Proto;

use crate::pipeline::handle_chat;
use crate::state::AppState;

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_chat(
        state,
        Proto::OpenAIChat,
        false,
        "/v1/chat/completions",
        "chat_completions",
        headers,
        body,
    )
    .await
}
