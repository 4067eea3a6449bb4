use serde_json::Value;

use tingly_protocol::claude::messages::StopReason;
use tingly_protocol::claude::stream::{AnyStreamEvent, StreamEvent};
use tingly_protocol::gemini::FinishReason as GeminiFinishReason;
use tingly_protocol::openai::chat::FinishReason;
use tingly_protocol::openai::stream::ChatCompletionChunk;

/// A chat wire protocol. `OpenAIChat` and `Claude` are full request/response/
/// stream surfaces; `Gemini` is the auxiliary generate-content surface used
/// for request/response conversion only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    OpenAIChat,
    Claude,
    Gemini,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::OpenAIChat => "openai-chat",
            Proto::Claude => "claude",
            Proto::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("no adapter for {src:?} -> {dst:?}")]
    UnsupportedPair { src: Proto, dst: Proto },
    #[error("stream event does not match source protocol {expected:?}")]
    ProtoMismatch { expected: Proto },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

// Finish-reason tables. Unknown values collapse to the protocol's neutral
// "done" reason per the forward tables below.

pub fn finish_openai_to_claude(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::ContentFilter,
    }
}

pub fn finish_claude_to_openai(reason: StopReason) -> FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::ContentFilter => FinishReason::ContentFilter,
    }
}

pub fn finish_openai_to_gemini(reason: FinishReason) -> GeminiFinishReason {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls => GeminiFinishReason::Stop,
        FinishReason::Length => GeminiFinishReason::MaxTokens,
        FinishReason::ContentFilter => GeminiFinishReason::Safety,
    }
}

pub fn finish_gemini_to_openai(reason: GeminiFinishReason) -> FinishReason {
    match reason {
        GeminiFinishReason::Stop => FinishReason::Stop,
        GeminiFinishReason::MaxTokens => FinishReason::Length,
        GeminiFinishReason::Safety => FinishReason::ContentFilter,
        GeminiFinishReason::Recitation | GeminiFinishReason::Other => FinishReason::Stop,
    }
}

pub fn finish_claude_to_gemini(reason: StopReason) -> GeminiFinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence | StopReason::ToolUse => {
            GeminiFinishReason::Stop
        }
        StopReason::MaxTokens => GeminiFinishReason::MaxTokens,
        StopReason::ContentFilter => GeminiFinishReason::Safety,
    }
}

pub fn finish_gemini_to_claude(reason: GeminiFinishReason) -> StopReason {
    match reason {
        GeminiFinishReason::Stop => StopReason::EndTurn,
        GeminiFinishReason::MaxTokens => StopReason::MaxTokens,
        GeminiFinishReason::Safety => StopReason::ContentFilter,
        GeminiFinishReason::Recitation | GeminiFinishReason::Other => StopReason::EndTurn,
    }
}

// The upstream model id never reaches the client: every outbound payload that
// carries a `model` field gets the rule's response model (or the inbound
// request model) instead. Streams are rewritten event-by-event.

pub fn rewrite_chunk_model(chunk: &mut ChatCompletionChunk, model: &str) {
    chunk.model = model.to_string();
}

pub fn rewrite_claude_event_model(event: &mut AnyStreamEvent, model: &str) {
    match event {
        AnyStreamEvent::Event(StreamEvent::MessageStart { message }) => {
            message.model = model.to_string();
        }
        AnyStreamEvent::Unknown(value) => rewrite_value_model(value, model),
        _ => {}
    }
}

pub fn rewrite_value_model(value: &mut Value, model: &str) {
    if let Some(object) = value.as_object_mut() {
        if object.contains_key("model") {
            object.insert("model".to_string(), Value::String(model.to_string()));
        }
        if let Some(message) = object.get_mut("message").and_then(Value::as_object_mut) {
            if message.contains_key("model") {
                message.insert("model".to_string(), Value::String(model.to_string()));
            }
        }
    }
}

/// Decode a tool-call `arguments` string into a JSON object, preserving
/// non-object payloads under a wrapper key rather than dropping them.
pub fn parse_tool_arguments(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => serde_json::json!({ "arguments": other }),
        Err(_) => {
            if arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::json!({ "arguments": arguments })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_finish_reasons_round_trip() {
        for reason in [
            FinishReason::Stop,
            FinishReason::Length,
            FinishReason::ToolCalls,
            FinishReason::ContentFilter,
        ] {
            assert_eq!(
                finish_claude_to_openai(finish_openai_to_claude(reason)),
                reason
            );
        }
    }

    #[test]
    fn gemini_table_maps_safety_and_other() {
        assert_eq!(
            finish_openai_to_gemini(FinishReason::ContentFilter),
            GeminiFinishReason::Safety
        );
        assert_eq!(
            finish_gemini_to_claude(GeminiFinishReason::Other),
            StopReason::EndTurn
        );
        assert_eq!(
            finish_openai_to_gemini(FinishReason::ToolCalls),
            GeminiFinishReason::Stop
        );
    }

    #[test]
    fn unknown_event_model_rewrite_touches_nested_message() {
        let mut value = serde_json::json!({
            "type": "message_start",
            "message": {"model": "upstream-x", "id": "m1"}
        });
        rewrite_value_model(&mut value, "public-name");
        assert_eq!(value["message"]["model"], "public-name");
    }

    #[test]
    fn tool_arguments_survive_bad_json() {
        assert_eq!(parse_tool_arguments("{\"a\":1}"), serde_json::json!({"a":1}));
        assert_eq!(
            parse_tool_arguments("not json"),
            serde_json::json!({"arguments": "not json"})
        );
        assert_eq!(parse_tool_arguments(""), serde_json::json!({}));
    }
}
