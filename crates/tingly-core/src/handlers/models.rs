use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::HeaderMap;
use time::OffsetDateTime;

use tingly_protocol::openai::{ModelEntry, ModelList};
use tingly_transform::Proto;

use crate::error::GatewayError;
use crate::state::AppState;

/// `GET /v1/models`: one entry per routing rule, with provider metadata and
/// upstream aliases tucked into `metadata`.
pub async fn list_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(err) = state.auth.authenticate(&headers) {
        return GatewayError::Unauthorized(err.message).into_response(Proto::OpenAIChat);
    }

    let config = state.config.load();
    let created = OffsetDateTime::now_utc().unix_timestamp();

    let data = config
        .rules
        .iter()
        .filter(|rule| rule.enabled)
        .map(|rule| {
            let services: Vec<serde_json::Value> = rule
                .services
                .iter()
                .map(|service| {
                    let provider = config
                        .providers
                        .iter()
                        .find(|provider| provider.uuid == service.provider);
                    serde_json::json!({
                        "provider": provider.map(|p| p.name.clone()).unwrap_or_default(),
                        "api_base": provider.map(|p| p.api_base.clone()).unwrap_or_default(),
                        "actual_model": service.model,
                    })
                })
                .collect();
            let aliases: Vec<&str> = if rule.response_model.is_empty() {
                Vec::new()
            } else {
                vec![rule.response_model.as_str()]
            };
            ModelEntry {
                id: rule.request_model.clone(),
                object: "model".to_string(),
                created,
                owned_by: "tingly-box".to_string(),
                metadata: Some(serde_json::json!({
                    "services": services,
                    "aliases": aliases,
                })),
            }
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
    .into_response()
}
