use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use http::StatusCode;

use tingly_transform::Proto;

use crate::error::envelope_bytes;
use crate::handlers::{anthropic, models, openai};
use crate::state::AppState;

/// The gateway's HTTP surface.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/token", post(token))
        .route("/v1/models", get(models::list_models))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/messages", post(anthropic::messages))
        .route("/v1/messages/count_tokens", post(anthropic::count_tokens))
        .with_state(state)
}

async fn health() -> Response {
    json(
        StatusCode::OK,
        Bytes::from_static(b"{\"status\":\"ok\"}"),
    )
}

/// Delegated to the credential collaborator behind `AuthProvider`.
async fn token(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.auth.issue_token(&body) {
        Ok(value) => json(
            StatusCode::OK,
            Bytes::from(value.to_string()),
        ),
        Err(err) => json(
            err.status,
            envelope_bytes(Proto::OpenAIChat, &err.message, "invalid_request_error", None),
        ),
    }
}

fn json(status: StatusCode, body: Bytes) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}
