use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tracing::warn;

use tingly_client::UpstreamBody;
use tingly_protocol::claude::messages::{CountTokensRequest, CountTokensResponse};
use tingly_transform::Proto;

use crate::count_tokens::count_input_tokens;
use crate::error::GatewayError;
use crate::pipeline::{handle_chat, proto_for_style};
use crate::state::AppState;

/// `POST /v1/messages`, standard and `beta.` variant. The beta variant is
/// selected by the `anthropic-beta` request header.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let beta = headers.contains_key("anthropic-beta");
    handle_chat(
        state,
        Proto::Claude,
        beta,
        "/v1/messages",
        "messages",
        headers,
        body,
    )
    .await
}

/// `POST /v1/messages/count_tokens`. Anthropic-style providers answer
/// authoritatively; for everyone else the count is computed locally.
pub async fn count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match run_count_tokens(state, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            warn!(event = "count_tokens_failed", error = %err);
            err.into_response(Proto::Claude)
        }
    }
}

async fn run_count_tokens(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    state
        .auth
        .authenticate(&headers)
        .map_err(|err| GatewayError::Unauthorized(err.message))?;

    let mut request: CountTokensRequest = serde_json::from_slice(&body)
        .map_err(|err| GatewayError::InvalidRequest(format!("invalid request body: {err}")))?;
    if request.model.is_empty() {
        return Err(GatewayError::InvalidRequest("model is required".to_string()));
    }

    let decision = state.router.resolve(&request.model).await?;
    let upstream_model = decision.service.model.clone();

    if proto_for_style(decision.provider.api_style) == Proto::Claude {
        request.model = upstream_model.clone();
        let payload = serde_json::to_vec(&request)
            .map_err(|err| GatewayError::Internal(err.to_string()))?;
        let client = state
            .clients
            .client(&decision.provider, &upstream_model)
            .map_err(GatewayError::from)?;
        let upstream = tokio::time::timeout(
            client.timeout(),
            client.post_json("messages/count_tokens", Bytes::from(payload), false),
        )
        .await
        .map_err(|_| GatewayError::Timeout(format!("no response within {:?}", client.timeout())))?
        .map_err(GatewayError::from)?;

        let UpstreamBody::Buffered(bytes) = upstream.body else {
            return Err(GatewayError::Internal(
                "unexpected stream body on buffered call".to_string(),
            ));
        };
        if !upstream.status.is_success() {
            return Err(GatewayError::Upstream {
                status: Some(upstream.status),
                message: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        return json_response(bytes);
    }

    let input_tokens = count_input_tokens(&upstream_model, &request)?;
    let payload = serde_json::to_vec(&CountTokensResponse { input_tokens })
        .map_err(|err| GatewayError::Internal(err.to_string()))?;
    json_response(Bytes::from(payload))
}

fn json_response(body: Bytes) -> Result<Response, GatewayError> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .map_err(|err| GatewayError::Internal(err.to_string()))
}
