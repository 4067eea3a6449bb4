use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use http::{HeaderMap, StatusCode};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tingly_balance::{AuthStyle, RouteDecision};
use tingly_client::{ClientError, UpstreamBody, UpstreamClient};
use tingly_protocol::claude::messages::{Message, MessagesRequest};
use tingly_protocol::claude::stream::{AnyStreamEvent, StreamEvent};
use tingly_protocol::openai::chat::{ChatCompletion, ChatCompletionRequest};
use tingly_protocol::openai::stream::ChatCompletionChunk;
use tingly_protocol::sse::{done_frame, encode_frame, SseDecoder, SseFrame};
use tingly_transform::generate::{claude2openai, openai2claude};
use tingly_transform::stream::{ChatStreamEvent, StreamAdapter, UsageTally};
use tingly_transform::{Proto, TokenBudget};

use crate::error::{stream_error_frame, GatewayError};
use crate::obs::ScenarioRecorder;
use crate::state::AppState;

pub fn proto_for_style(style: AuthStyle) -> Proto {
    match style {
        AuthStyle::OpenAI => Proto::OpenAIChat,
        AuthStyle::Anthropic => Proto::Claude,
    }
}

fn upstream_chat_path(proto: Proto) -> &'static str {
    match proto {
        Proto::Claude => "messages",
        _ => "chat/completions",
    }
}

enum TypedRequest {
    OpenAi(Box<ChatCompletionRequest>),
    Claude(Box<MessagesRequest>),
}

impl TypedRequest {
    fn parse(client_proto: Proto, body: &Bytes) -> Result<Self, GatewayError> {
        match client_proto {
            Proto::OpenAIChat => {
                let request: ChatCompletionRequest = serde_json::from_slice(body)
                    .map_err(|err| GatewayError::InvalidRequest(format!("invalid request body: {err}")))?;
                if request.messages.is_empty() {
                    return Err(GatewayError::InvalidRequest(
                        "at least one message is required".to_string(),
                    ));
                }
                Ok(TypedRequest::OpenAi(Box::new(request)))
            }
            Proto::Claude => {
                let request: MessagesRequest = serde_json::from_slice(body)
                    .map_err(|err| GatewayError::InvalidRequest(format!("invalid request body: {err}")))?;
                if request.messages.is_empty() {
                    return Err(GatewayError::InvalidRequest(
                        "at least one message is required".to_string(),
                    ));
                }
                Ok(TypedRequest::Claude(Box::new(request)))
            }
            Proto::Gemini => Err(GatewayError::Internal(
                "gemini is not an inbound protocol".to_string(),
            )),
        }
    }

    fn wants_stream(&self) -> bool {
        match self {
            TypedRequest::OpenAi(request) => request.wants_stream(),
            TypedRequest::Claude(request) => request.wants_stream(),
        }
    }
}

fn build_upstream_body(
    request: TypedRequest,
    provider_proto: Proto,
    decision: &RouteDecision,
    budget: &TokenBudget,
    adapter_enabled: bool,
) -> Result<Bytes, GatewayError> {
    let provider_name = decision.provider.name.as_str();
    let upstream_model = decision.service.model.as_str();

    let body = match (request, provider_proto) {
        (TypedRequest::OpenAi(mut request), Proto::OpenAIChat) => {
            request.model = upstream_model.to_string();
            budget.apply_openai(&mut request, provider_name, upstream_model);
            serde_json::to_vec(&*request)
        }
        (TypedRequest::Claude(mut request), Proto::Claude) => {
            request.model = upstream_model.to_string();
            budget.apply_claude(&mut request, provider_name, upstream_model);
            serde_json::to_vec(&*request)
        }
        (TypedRequest::OpenAi(request), Proto::Claude) => {
            require_adapter(adapter_enabled, &decision.provider.name)?;
            let mut converted = openai2claude::transform_request(&request);
            converted.model = upstream_model.to_string();
            budget.apply_claude(&mut converted, provider_name, upstream_model);
            serde_json::to_vec(&converted)
        }
        (TypedRequest::Claude(request), Proto::OpenAIChat) => {
            require_adapter(adapter_enabled, &decision.provider.name)?;
            let mut converted = claude2openai::transform_request(&request);
            converted.model = upstream_model.to_string();
            budget.apply_openai(&mut converted, provider_name, upstream_model);
            serde_json::to_vec(&converted)
        }
        (_, Proto::Gemini) => {
            return Err(GatewayError::Internal(
                "gemini providers are not routable".to_string(),
            ))
        }
    }
    .map_err(|err| GatewayError::Internal(err.to_string()))?;

    Ok(Bytes::from(body))
}

fn require_adapter(enabled: bool, provider_name: &str) -> Result<(), GatewayError> {
    if enabled {
        Ok(())
    } else {
        Err(GatewayError::AdapterDisabled(format!(
            "request format adaptation is disabled; cannot translate for provider {provider_name:?}"
        )))
    }
}

/// Convert the buffered upstream body to the client protocol, rewrite the
/// model, and report (input, output) token usage.
fn adapt_response_body(
    upstream: &Bytes,
    provider_proto: Proto,
    client_proto: Proto,
    response_model: &str,
) -> Result<(Bytes, (i64, i64)), GatewayError> {
    let bad_upstream =
        |err: serde_json::Error| GatewayError::Upstream {
            status: None,
            message: format!("unparseable upstream response: {err}"),
        };

    match (provider_proto, client_proto) {
        (Proto::OpenAIChat, Proto::OpenAIChat) | (Proto::Claude, Proto::Claude) => {
            let mut value: serde_json::Value =
                serde_json::from_slice(upstream).map_err(bad_upstream)?;
            let usage = match provider_proto {
                Proto::OpenAIChat => (
                    value["usage"]["prompt_tokens"].as_i64().unwrap_or(0),
                    value["usage"]["completion_tokens"].as_i64().unwrap_or(0),
                ),
                _ => (
                    value["usage"]["input_tokens"].as_i64().unwrap_or(0),
                    value["usage"]["output_tokens"].as_i64().unwrap_or(0),
                ),
            };
            if let Some(object) = value.as_object_mut() {
                object.insert(
                    "model".to_string(),
                    serde_json::Value::String(response_model.to_string()),
                );
            }
            let body = serde_json::to_vec(&value)
                .map_err(|err| GatewayError::Internal(err.to_string()))?;
            Ok((Bytes::from(body), usage))
        }
        (Proto::OpenAIChat, Proto::Claude) => {
            let completion: ChatCompletion =
                serde_json::from_slice(upstream).map_err(bad_upstream)?;
            let usage = completion
                .usage
                .map(|usage| (usage.prompt_tokens as i64, usage.completion_tokens as i64))
                .unwrap_or((0, 0));
            let mut message = openai2claude::transform_response(&completion);
            message.model = response_model.to_string();
            let body = serde_json::to_vec(&message)
                .map_err(|err| GatewayError::Internal(err.to_string()))?;
            Ok((Bytes::from(body), usage))
        }
        (Proto::Claude, Proto::OpenAIChat) => {
            let message: Message = serde_json::from_slice(upstream).map_err(bad_upstream)?;
            let usage = (
                message.usage.input_tokens as i64,
                message.usage.output_tokens as i64,
            );
            let mut completion = claude2openai::transform_response(
                &message,
                OffsetDateTime::now_utc().unix_timestamp(),
            );
            completion.model = response_model.to_string();
            let body = serde_json::to_vec(&completion)
                .map_err(|err| GatewayError::Internal(err.to_string()))?;
            Ok((Bytes::from(body), usage))
        }
        _ => Err(GatewayError::Internal(
            "unsupported protocol pairing".to_string(),
        )),
    }
}

/// The whole request pipeline for both chat surfaces: authenticate, route,
/// adapt, forward, convert back, record.
pub async fn handle_chat(
    state: Arc<AppState>,
    client_proto: Proto,
    beta: bool,
    endpoint: &'static str,
    scenario: &'static str,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match run_chat(state, client_proto, beta, endpoint, scenario, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            warn!(event = "request_failed", status = err.status().as_u16(), error = %err);
            err.into_response(client_proto)
        }
    }
}

async fn run_chat(
    state: Arc<AppState>,
    client_proto: Proto,
    beta: bool,
    endpoint: &'static str,
    scenario: &'static str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let trace_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let raw: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|err| GatewayError::InvalidRequest(format!("invalid request body: {err}")))?;

    state
        .auth
        .authenticate(&headers)
        .map_err(|err| GatewayError::Unauthorized(err.message))?;

    let request_model = raw
        .get("model")
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("model is required".to_string()))?
        .to_string();

    let mut recorder = state
        .obs
        .begin(scenario, "POST", endpoint, &headers, &body);

    let request = TypedRequest::parse(client_proto, &body)?;
    let is_stream = request.wants_stream();

    let decision = state.router.resolve(&request_model).await?;
    let provider_proto = proto_for_style(decision.provider.api_style);
    // The beta surface only fronts anthropic-style providers.
    if beta && provider_proto != Proto::Claude {
        return Err(GatewayError::AdapterDisabled(
            "beta messages only support anthropic-style providers".to_string(),
        ));
    }

    info!(
        event = "request_routed",
        trace_id = %trace_id,
        model = %request_model,
        provider = %decision.provider.name,
        upstream_model = %decision.service.model,
        client_proto = client_proto.as_str(),
        provider_proto = provider_proto.as_str(),
        is_stream = is_stream,
    );

    let config = state.config.load();
    let budget = config.token_budget();
    let upstream_body = build_upstream_body(
        request,
        provider_proto,
        &decision,
        &budget,
        config.adapter_enabled,
    )?;

    let client = state
        .clients
        .client(&decision.provider, &decision.service.model)
        .map_err(GatewayError::from)?;
    let path = upstream_chat_path(provider_proto);

    if is_stream {
        let response = stream_upstream(
            state.clone(),
            client,
            path,
            upstream_body,
            provider_proto,
            client_proto,
            decision,
            recorder,
            trace_id.clone(),
        )
        .await?;
        return Ok(response);
    }

    // Non-streaming: provider timeout bounds the whole exchange.
    let upstream = tokio::time::timeout(client.timeout(), client.post_json(path, upstream_body, false))
        .await
        .map_err(|_| GatewayError::Timeout(format!("no response within {:?}", client.timeout())))?
        .map_err(GatewayError::from)?;

    let UpstreamBody::Buffered(upstream_bytes) = upstream.body else {
        return Err(GatewayError::Internal(
            "unexpected stream body on buffered call".to_string(),
        ));
    };

    if !upstream.status.is_success() {
        let err = GatewayError::Upstream {
            status: Some(upstream.status),
            message: String::from_utf8_lossy(&upstream_bytes).to_string(),
        };
        if let Some(recorder) = recorder.take() {
            recorder.finish_error(err.status().as_u16(), &err.to_string());
        }
        return Err(err);
    }

    let (response_body, (input_tokens, output_tokens)) = adapt_response_body(
        &upstream_bytes,
        provider_proto,
        client_proto,
        &decision.response_model,
    )?;

    if let Err(err) = state
        .stats
        .record_usage(&decision.rule.uuid, &decision.service, input_tokens, output_tokens)
        .await
    {
        warn!(event = "stats_record_failed", trace_id = %trace_id, error = %err);
    }

    if let Some(mut recorder) = recorder.take() {
        recorder.stash_response(&response_body);
        recorder.finish(StatusCode::OK.as_u16());
    }

    info!(
        event = "request_completed",
        trace_id = %trace_id,
        elapsed_ms = started.elapsed().as_millis(),
        input_tokens = input_tokens,
        output_tokens = output_tokens,
        is_stream = false,
    );

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(response_body))
        .map_err(|err| GatewayError::Internal(err.to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn stream_upstream(
    state: Arc<AppState>,
    client: Arc<UpstreamClient>,
    path: &'static str,
    upstream_body: Bytes,
    provider_proto: Proto,
    client_proto: Proto,
    decision: RouteDecision,
    recorder: Option<ScenarioRecorder>,
    trace_id: String,
) -> Result<Response, GatewayError> {
    // No deadline here: stream lifetime governs.
    let upstream = client
        .post_json(path, upstream_body, true)
        .await
        .map_err(GatewayError::from)?;

    let byte_stream = match upstream.body {
        UpstreamBody::Stream(stream) => stream,
        UpstreamBody::Buffered(bytes) => {
            let err = GatewayError::Upstream {
                status: Some(upstream.status),
                message: String::from_utf8_lossy(&bytes).to_string(),
            };
            if let Some(recorder) = recorder {
                recorder.finish_error(err.status().as_u16(), &err.to_string());
            }
            return Err(err);
        }
    };

    let (tx, rx) = mpsc::channel::<Bytes>(32);
    let panic_tx = tx.clone();
    tokio::spawn(async move {
        let pump = pump_stream(
            state,
            byte_stream,
            provider_proto,
            client_proto,
            decision,
            recorder,
            trace_id,
            tx,
        );
        // A panic in the pump surfaces as an error event instead of a
        // silently truncated stream.
        if std::panic::AssertUnwindSafe(pump).catch_unwind().await.is_err() {
            let _ = panic_tx
                .send(stream_error_frame(client_proto, "internal streaming error"))
                .await;
        }
    });

    let body_stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(Body::from_stream(body_stream))
        .map_err(|err| GatewayError::Internal(err.to_string()))
}

enum FrameOutcome {
    Continue,
    Done,
    Closed,
    Failed(String),
}

#[allow(clippy::too_many_arguments)]
async fn pump_stream(
    state: Arc<AppState>,
    mut byte_stream: BoxStream<'static, Result<Bytes, ClientError>>,
    provider_proto: Proto,
    client_proto: Proto,
    decision: RouteDecision,
    recorder: Option<ScenarioRecorder>,
    trace_id: String,
    tx: mpsc::Sender<Bytes>,
) {
    let started = Instant::now();
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let mut adapter = match StreamAdapter::new(
        provider_proto,
        client_proto,
        &decision.response_model,
        created,
    ) {
        Ok(adapter) => adapter,
        Err(err) => {
            let _ = tx.send(stream_error_frame(client_proto, &err.to_string())).await;
            return;
        }
    };

    let mut decoder = SseDecoder::new();
    let mut tally = UsageTally::default();
    let mut failure: Option<String> = None;
    let mut client_gone = false;

    'upstream: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                failure = Some(err.to_string());
                break;
            }
        };
        for frame in decoder.feed(&chunk) {
            match forward_frame(&frame, provider_proto, &mut adapter, &mut tally, &tx).await {
                FrameOutcome::Continue => {}
                FrameOutcome::Done => break 'upstream,
                FrameOutcome::Closed => {
                    client_gone = true;
                    break 'upstream;
                }
                FrameOutcome::Failed(message) => {
                    failure = Some(message);
                    break 'upstream;
                }
            }
        }
    }
    // Upstream is dropped on every path out of the loop, which cancels the
    // in-flight request.
    drop(byte_stream);

    if failure.is_none() && !client_gone {
        for frame in decoder.flush() {
            if let FrameOutcome::Failed(message) =
                forward_frame(&frame, provider_proto, &mut adapter, &mut tally, &tx).await
            {
                failure = Some(message);
                break;
            }
        }
    }

    if failure.is_none() && !client_gone {
        for event in adapter.finish() {
            tally.observe(&event);
            if let Some(frame) = encode_event(&event) {
                if tx.send(frame).await.is_err() {
                    client_gone = true;
                    break;
                }
            }
        }
        if !client_gone {
            // Terminal sentinel: OpenAI-style streams close with [DONE],
            // Anthropic-style with an unnamed message_stop payload.
            let sentinel = if adapter.emits_openai_done() {
                done_frame()
            } else {
                encode_frame(None, "{\"type\":\"message_stop\"}")
            };
            if tx.send(sentinel).await.is_err() {
                client_gone = true;
            }
        }
    }

    if let Some(message) = &failure {
        warn!(event = "stream_failed", trace_id = %trace_id, error = %message);
        let _ = tx.send(stream_error_frame(client_proto, message)).await;
    }

    // Partial streams still record whatever usage accumulated.
    let (input_tokens, output_tokens) = tally.tokens();
    if input_tokens > 0 || output_tokens > 0 {
        if let Err(err) = state
            .stats
            .record_usage(
                &decision.rule.uuid,
                &decision.service,
                input_tokens as i64,
                output_tokens as i64,
            )
            .await
        {
            warn!(event = "stats_record_failed", trace_id = %trace_id, error = %err);
        }
    }

    if let Some(recorder) = recorder {
        match &failure {
            Some(message) => recorder.finish_error(StatusCode::OK.as_u16(), message),
            None => recorder.finish(StatusCode::OK.as_u16()),
        }
    }

    info!(
        event = "request_completed",
        trace_id = %trace_id,
        elapsed_ms = started.elapsed().as_millis(),
        input_tokens = input_tokens,
        output_tokens = output_tokens,
        is_stream = true,
        client_disconnected = client_gone,
    );
}

async fn forward_frame(
    frame: &SseFrame,
    provider_proto: Proto,
    adapter: &mut StreamAdapter,
    tally: &mut UsageTally,
    tx: &mpsc::Sender<Bytes>,
) -> FrameOutcome {
    let data = frame.data.trim();
    if data.is_empty() {
        return FrameOutcome::Continue;
    }
    if data == "[DONE]" {
        return FrameOutcome::Done;
    }

    let event = match provider_proto {
        Proto::OpenAIChat => match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => ChatStreamEvent::OpenAi(chunk),
            Err(err) => {
                debug!(event = "stream_chunk_skipped", error = %err);
                return FrameOutcome::Continue;
            }
        },
        Proto::Claude => match serde_json::from_str::<AnyStreamEvent>(data) {
            Ok(event) => ChatStreamEvent::Claude(event),
            Err(err) => {
                debug!(event = "stream_chunk_skipped", error = %err);
                return FrameOutcome::Continue;
            }
        },
        Proto::Gemini => return FrameOutcome::Continue,
    };

    // An upstream error event aborts translation and is re-emitted in the
    // client's dialect.
    if let ChatStreamEvent::Claude(AnyStreamEvent::Event(StreamEvent::Error { error })) = &event {
        return FrameOutcome::Failed(error.message.clone());
    }

    tally.observe(&event);

    let downstream = match adapter.push(event) {
        Ok(events) => events,
        Err(err) => return FrameOutcome::Failed(err.to_string()),
    };
    for event in downstream {
        if let Some(frame) = encode_event(&event) {
            if tx.send(frame).await.is_err() {
                return FrameOutcome::Closed;
            }
        }
    }
    FrameOutcome::Continue
}

fn encode_event(event: &ChatStreamEvent) -> Option<Bytes> {
    match event {
        ChatStreamEvent::OpenAi(chunk) => {
            let data = serde_json::to_string(chunk).ok()?;
            Some(encode_frame(None, &data))
        }
        ChatStreamEvent::Claude(AnyStreamEvent::Event(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_frame(Some(event.event_name()), &data))
        }
        ChatStreamEvent::Claude(AnyStreamEvent::Unknown(value)) => {
            let name = value.get("type").and_then(|value| value.as_str());
            let data = serde_json::to_string(value).ok()?;
            Some(encode_frame(name, &data))
        }
    }
}
