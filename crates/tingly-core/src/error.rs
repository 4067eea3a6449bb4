use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::StatusCode;

use tingly_balance::RouteError;
use tingly_client::ClientError;
use tingly_protocol::{claude, openai};
use tingly_transform::Proto;

/// The gateway error taxonomy. Every variant knows its HTTP status and the
/// envelope `type` it renders as; the envelope shape follows the client's
/// protocol, not the provider's.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("no rule matches model {0:?}")]
    UnknownModel(String),
    #[error("all services exhausted for model {0:?}")]
    AllExhausted(String),
    #[error("{0}")]
    AdapterDisabled(String),
    #[error("upstream error: {message}")]
    Upstream {
        status: Option<StatusCode>,
        message: String,
    },
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) | GatewayError::UnknownModel(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AllExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::AdapterDisabled(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Upstream { .. } | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_)
            | GatewayError::Unauthorized(_)
            | GatewayError::UnknownModel(_) => "invalid_request_error",
            GatewayError::AllExhausted(_)
            | GatewayError::Upstream { .. }
            | GatewayError::Timeout(_) => "api_error",
            GatewayError::AdapterDisabled(_) => "adapter_disabled",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Render as a protocol-appropriate JSON envelope.
    pub fn into_response(self, client_proto: Proto) -> Response {
        let message = self.to_string();
        let body = envelope_bytes(client_proto, &message, self.error_type(), None);
        Response::builder()
            .status(self.status())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_default()
    }
}

impl From<RouteError> for GatewayError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::UnknownModel(model) => GatewayError::UnknownModel(model),
            RouteError::RuleEmpty(model) => {
                GatewayError::InvalidRequest(format!("rule for model {model:?} has no services"))
            }
            RouteError::AllExhausted(model) => GatewayError::AllExhausted(model),
        }
    }
}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout(duration) => {
                GatewayError::Timeout(format!("no response within {duration:?}"))
            }
            other => GatewayError::Upstream {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

pub fn envelope_bytes(
    client_proto: Proto,
    message: &str,
    error_type: &str,
    code: Option<&str>,
) -> Bytes {
    let body = match client_proto {
        Proto::Claude => {
            let mut envelope = claude::ErrorEnvelope::new(message, error_type);
            if let Some(code) = code {
                envelope = envelope.with_code(code);
            }
            serde_json::to_vec(&envelope)
        }
        _ => {
            let mut envelope = openai::ErrorEnvelope::new(message, error_type);
            if let Some(code) = code {
                envelope = envelope.with_code(code);
            }
            serde_json::to_vec(&envelope)
        }
    };
    Bytes::from(body.unwrap_or_else(|_| b"{\"error\":{}}".to_vec()))
}

/// The mid-stream error event: `{message, type: "stream_error",
/// code: "stream_failed"}` wrapped per client protocol and SSE-framed.
pub fn stream_error_frame(client_proto: Proto, message: &str) -> Bytes {
    let payload = envelope_bytes(client_proto, message, "stream_error", Some("stream_failed"));
    let data = String::from_utf8_lossy(&payload).to_string();
    match client_proto {
        Proto::Claude => tingly_protocol::sse::encode_frame(Some("error"), &data),
        _ => tingly_protocol::sse::encode_frame(None, &data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            GatewayError::UnknownModel("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::AllExhausted("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::AdapterDisabled("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            GatewayError::Timeout("x".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn anthropic_envelope_carries_the_outer_error_type() {
        let bytes = envelope_bytes(Proto::Claude, "boom", "api_error", None);
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["type"], "api_error");
    }

    #[test]
    fn stream_error_frame_is_sse_named_for_claude() {
        let frame = stream_error_frame(Proto::Claude, "boom");
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("event: error\n"));
        assert!(text.contains("stream_failed"));
    }
}
